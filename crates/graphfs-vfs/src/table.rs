// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::ffi::OsStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use graphfs::DirEntry;

use crate::Error;

#[cfg(test)]
#[path = "./table_test.rs"]
mod table_test;

/// The root inode must always be 1
pub const ROOT_INODE: u64 = 1;

/// Assigns stable inode numbers to paths.
///
/// The graph has no inode concept of its own, so each distinct
/// path is given a number the first time that the kernel sees it,
/// and keeps that number for the life of the mount.
pub struct InodeTable {
    next_inode: AtomicU64,
    paths: DashMap<u64, Arc<str>>,
    inodes: DashMap<Arc<str>, u64>,
}

impl Default for InodeTable {
    fn default() -> Self {
        let table = Self {
            next_inode: AtomicU64::new(ROOT_INODE),
            paths: Default::default(),
            inodes: Default::default(),
        };
        table.inode_for("/");
        table
    }
}

impl InodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The path that was given this inode
    pub fn path(&self, ino: u64) -> Result<Arc<str>, Error> {
        self.paths
            .get(&ino)
            .map(|p| Arc::clone(p.value()))
            .ok_or(Error::UnknownInode(ino))
    }

    /// The path of a named entry within a directory
    pub fn child(&self, parent: u64, name: &OsStr) -> Result<String, Error> {
        let parent = self.path(parent)?;
        let Some(name) = name.to_str().filter(|n| !n.is_empty() && !n.contains('/')) else {
            return Err(Error::InvalidName(name.to_owned()));
        };
        Ok(join(&parent, name))
    }

    /// The inode of a path, allocating one if needed
    pub fn inode_for(&self, path: &str) -> u64 {
        if let Some(ino) = self.inodes.get(path) {
            return *ino;
        }
        let path: Arc<str> = Arc::from(path);
        *self
            .inodes
            .entry(Arc::clone(&path))
            .or_insert_with(|| {
                let ino = self.next_inode.fetch_add(1, Ordering::Relaxed);
                self.paths.insert(ino, path);
                ino
            })
            .value()
    }

    /// The inode of the directory containing the given path
    pub fn parent_of(&self, path: &str) -> u64 {
        match path.trim_end_matches('/').rsplit_once('/') {
            Some(("", _)) | None => ROOT_INODE,
            Some((parent, _)) => self.inode_for(parent),
        }
    }
}

/// Join a directory path and an entry name
pub fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// State held between an open and its release
pub enum Handle {
    /// A listing taken when the directory was opened, so that
    /// offsets stay meaningful across readdir calls
    Directory { entries: Vec<(u64, DirEntry)> },
    File { path: Arc<str> },
}

pub struct HandleTable {
    next_handle: AtomicU64,
    handles: DashMap<u64, Arc<Handle>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self {
            // we do not allocate handle 0, so skip it for now
            next_handle: AtomicU64::new(1),
            handles: Default::default(),
        }
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, data: Handle) -> u64 {
        let data = Arc::new(data);
        loop {
            let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                // the 'empty/zero' handle value is never allocated
                continue;
            }
            match self.handles.entry(id) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(v) => {
                    v.insert(data);
                    break id;
                }
            }
        }
    }

    pub fn get(&self, fh: u64) -> Result<Arc<Handle>, Error> {
        self.handles
            .get(&fh)
            .map(|h| Arc::clone(h.value()))
            .ok_or(Error::UnknownHandle(fh))
    }

    pub fn release(&self, fh: u64) -> Result<(), Error> {
        self.handles
            .remove(&fh)
            .map(|_| ())
            .ok_or(Error::UnknownHandle(fh))
    }
}
