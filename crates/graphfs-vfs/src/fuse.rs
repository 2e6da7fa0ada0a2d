// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::consts::FOPEN_DIRECT_IO;
use fuser::{
    FileAttr,
    FileType,
    MountOption,
    ReplyAttr,
    ReplyData,
    ReplyDirectory,
    ReplyEmpty,
    ReplyEntry,
    ReplyOpen,
    ReplyWrite,
    Request,
    TimeOrNow,
};
use graphfs::{AccessMode, Attr, DirEntry, Dispatcher, NodeKind, OsError};

use crate::table::{Handle, HandleTable, InodeTable, join};

/// Options to configure the FUSE filesystem and
/// its behavior at runtime
#[derive(Debug, Clone)]
pub struct Config {
    /// The user id that should own all files and directories
    pub uid: nix::unistd::Uid,
    /// The group id that should own all files and directories
    pub gid: nix::unistd::Gid,
    /// Mount options to be used when setting up
    pub mount_options: HashSet<MountOption>,
    /// How long the kernel may cache attributes and entries
    pub ttl: Duration,
}

/// Handles the allocation of inodes, and async responses to all FUSE requests
struct Filesystem {
    dispatcher: Arc<Dispatcher>,
    opts: Config,
    inodes: InodeTable,
    handles: HandleTable,
}

impl Filesystem {
    // the graph has no notion of disk blocks, this is only
    // a realistic value for commands to use (eg du)
    const BLOCK_SIZE: u32 = 512;

    fn file_attr(&self, ino: u64, attr: &Attr) -> FileAttr {
        let kind = match attr.kind {
            NodeKind::Directory => FileType::Directory,
            NodeKind::File => FileType::RegularFile,
        };
        FileAttr {
            ino,
            size: attr.size,
            perm: attr.perm,
            uid: self.opts.uid.as_raw(),
            gid: self.opts.gid.as_raw(),
            blocks: (attr.size / Self::BLOCK_SIZE as u64) + 1,
            atime: attr.mtime,
            mtime: attr.mtime,
            ctime: attr.mtime,
            crtime: attr.mtime,
            kind,
            nlink: if attr.kind == NodeKind::Directory { 2 } else { 1 },
            rdev: 0,
            blksize: Self::BLOCK_SIZE,
            flags: 0,
        }
    }
}

/// Extract the ok value from a result, or reply with an error in FUSE
macro_rules! unwrap {
    ($reply:ident, $op:expr) => {{
        match $op {
            Ok(r) => r,
            Err(err) => err!($reply, err),
        }
    }};
}

/// Reply with an error to FUSE and return
macro_rules! err {
    ($reply:ident, $err:expr) => {{
        let err = $err;
        tracing::debug!("{err}");
        let errno = err.os_error().unwrap_or(libc::EIO);
        $reply.error(errno);
        return;
    }};
}

impl Filesystem {
    async fn lookup(&self, parent: u64, name: OsString, reply: ReplyEntry) {
        let path = unwrap!(reply, self.inodes.child(parent, &name));
        tracing::trace!("lookup {path}");
        let attr = unwrap!(reply, self.dispatcher.getattr(&path).await);
        let ino = self.inodes.inode_for(&path);
        reply.entry(&self.opts.ttl, &self.file_attr(ino, &attr), 0);
    }

    async fn getattr(&self, ino: u64, reply: ReplyAttr) {
        let path = unwrap!(reply, self.inodes.path(ino));
        let attr = unwrap!(reply, self.dispatcher.getattr(&path).await);
        reply.attr(&self.opts.ttl, &self.file_attr(ino, &attr));
    }

    async fn setattr(&self, ino: u64, size: Option<u64>, reply: ReplyAttr) {
        let path = unwrap!(reply, self.inodes.path(ino));
        if let Some(size) = size {
            unwrap!(reply, self.dispatcher.truncate(&path, size).await);
        }
        let attr = unwrap!(reply, self.dispatcher.getattr(&path).await);
        reply.attr(&self.opts.ttl, &self.file_attr(ino, &attr));
    }

    async fn open(&self, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = unwrap!(reply, self.inodes.path(ino));
        let mode = AccessMode::from_flags(flags);
        unwrap!(reply, self.dispatcher.open(&path, mode).await);
        let fh = self.handles.allocate(Handle::File { path });
        tracing::trace!("open {ino} {mode:?} = {fh}");
        // content is fetched on each read, and may not match the
        // size that was last reported for the file
        reply.opened(fh, FOPEN_DIRECT_IO);
    }

    async fn read(&self, fh: u64, offset: i64, size: u32, reply: ReplyData) {
        let handle = unwrap!(reply, self.handles.get(fh));
        let Handle::File { path } = &*handle else {
            reply.error(libc::EISDIR);
            return;
        };
        let offset = u64::try_from(offset).unwrap_or_default();
        let data = unwrap!(
            reply,
            self.dispatcher.read(path, offset, size as usize).await
        );
        tracing::trace!("read {fh} = {}/{size}", data.len());
        reply.data(&data);
    }

    async fn write(&self, fh: u64, offset: i64, data: Vec<u8>, reply: ReplyWrite) {
        let handle = unwrap!(reply, self.handles.get(fh));
        let Handle::File { path } = &*handle else {
            reply.error(libc::EISDIR);
            return;
        };
        let offset = u64::try_from(offset).unwrap_or_default();
        let written = unwrap!(reply, self.dispatcher.write(path, offset, &data).await);
        reply.written(u32::try_from(written).unwrap_or(u32::MAX));
    }

    async fn unlink(&self, parent: u64, name: OsString, reply: ReplyEmpty) {
        let path = unwrap!(reply, self.inodes.child(parent, &name));
        unwrap!(reply, self.dispatcher.unlink(&path).await);
        reply.ok();
    }

    async fn release(&self, fh: u64, reply: ReplyEmpty) {
        unwrap!(reply, self.handles.release(fh));
        reply.ok();
    }

    async fn opendir(&self, ino: u64, reply: ReplyOpen) {
        let path = unwrap!(reply, self.inodes.path(ino));
        let listing = unwrap!(reply, self.dispatcher.readdir(&path).await);
        let parent = self.inodes.parent_of(&path);
        let entries = listing
            .into_iter()
            .map(|entry| {
                let ino = match entry.name.as_str() {
                    "." => ino,
                    ".." => parent,
                    name => self.inodes.inode_for(&join(&path, name)),
                };
                (ino, entry)
            })
            .collect();
        let fh = self.handles.allocate(Handle::Directory { entries });
        tracing::trace!("opendir {ino} = {fh}");
        reply.opened(fh, 0);
    }

    async fn readdir(&self, fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let handle = unwrap!(reply, self.handles.get(fh));
        let Handle::Directory { entries } = &*handle else {
            reply.error(libc::ENOTDIR);
            return;
        };
        let skip = usize::try_from(offset).unwrap_or_default();
        for (index, (ino, DirEntry { name, kind })) in entries.iter().enumerate().skip(skip) {
            let kind = match kind {
                NodeKind::Directory => FileType::Directory,
                NodeKind::File => FileType::RegularFile,
            };
            // the offset given is that of the next entry
            let buffer_full = reply.add(*ino, index as i64 + 1, kind, name);
            if buffer_full {
                break;
            }
        }
        reply.ok();
    }
}

pub struct Session {
    inner: Arc<Filesystem>,
}

impl Session {
    pub fn new(dispatcher: Arc<Dispatcher>, opts: Config) -> Self {
        Self {
            inner: Arc::new(Filesystem {
                dispatcher,
                opts,
                inodes: InodeTable::new(),
                handles: HandleTable::new(),
            }),
        }
    }
}

impl fuser::Filesystem for Session {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        tracing::info!("Filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        self.inner.dispatcher.destroy();
        tracing::info!("Filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name.to_owned();
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.lookup(parent, name, reply).await });
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.getattr(ino, reply).await });
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.setattr(ino, size, reply).await });
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.open(ino, flags, reply).await });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.read(fh, offset, size, reply).await });
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let data = data.to_vec();
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.write(fh, offset, data, reply).await });
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_owned();
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.unlink(parent, name, reply).await });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.release(fh, reply).await });
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.opendir(ino, reply).await });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.readdir(fh, offset, reply).await });
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.release(fh, reply).await });
    }
}
