// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;

use serde_json::Value;

use crate::auth::{Authenticator, requested_scopes};
use crate::config::Config;
use crate::endpoint::{self, Endpoint, FRIENDS, POST_FILE_NAME};
use crate::graph::Graph;
use crate::permissions::PermissionCatalog;
use crate::query::ME;
use crate::remote::GraphClient;
use crate::resolve::{Owner, PathClassification, classify};
use crate::{Document, Error, FsErrorKind, Result};

#[cfg(test)]
#[path = "./dispatch_test.rs"]
mod dispatch_test;

pub type FsResult<T> = std::result::Result<T, FsErrorKind>;

const DIRECTORY_MODE: u16 = 0o755;
const READ_ONLY_MODE: u16 = 0o400;
const WRITE_ONLY_MODE: u16 = 0o200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// The attributes reported for a single path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attr {
    pub kind: NodeKind,
    pub perm: u16,
    pub size: u64,
    pub mtime: SystemTime,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
}

impl DirEntry {
    fn new<S: Into<String>>(name: S, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// The access requested when opening a file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// The access mode of a set of `open(2)` flags
    pub fn from_flags(flags: i32) -> Self {
        match flags & libc::O_ACCMODE {
            libc::O_WRONLY => Self::WriteOnly,
            libc::O_RDWR => Self::ReadWrite,
            _ => Self::ReadOnly,
        }
    }
}

/// Answers filesystem operations for paths in the mounted tree.
///
/// Every operation classifies its path against the currently
/// visible endpoints, and then consults the remote graph through
/// the query cache. Failures are reported as the [`FsErrorKind`]
/// that the kernel should see.
pub struct Dispatcher {
    graph: Graph,
    catalog: PermissionCatalog,
    auth: Arc<dyn Authenticator>,
    mount_time: SystemTime,
    refresh: bool,
}

impl Dispatcher {
    /// Create a dispatcher without logging in or contacting the remote
    pub fn new(config: &Config, auth: Arc<dyn Authenticator>, client: Arc<dyn GraphClient>) -> Self {
        let mut served = BTreeSet::new();
        for name in config.filesystem.endpoints.iter() {
            match endpoint::lookup(name) {
                Some(endpoint) => {
                    served.insert(endpoint.name);
                }
                None => tracing::warn!(endpoint = %name, "ignoring unknown endpoint"),
            }
        }
        Self {
            graph: Graph::new(client, &config.api, config.filesystem.friend_lookup),
            catalog: PermissionCatalog::new(served),
            auth,
            mount_time: SystemTime::now(),
            refresh: config.filesystem.refresh_listings,
        }
    }

    /// Log in and prepare to serve the filesystem.
    ///
    /// The login is attempted up to the configured number of times,
    /// and failing to log in is fatal.
    pub async fn init(
        config: &Config,
        auth: Arc<dyn Authenticator>,
        client: Arc<dyn GraphClient>,
    ) -> Result<Self> {
        let scopes = requested_scopes(&config.auth.permissions, &config.auth.extended_permissions);
        for attempt in 1..=config.auth.login_attempts.max(1) {
            if auth.is_logged_in() {
                break;
            }
            let login = Arc::clone(&auth);
            let scopes = scopes.clone();
            // logging in may prompt on the terminal
            let result = tokio::task::spawn_blocking(move || login.login(&scopes))
                .await
                .map_err(|err| Error::String(format!("Login task failed: {err}")))?;
            if let Err(err) = result {
                tracing::warn!(attempt, "login failed: {err}");
            }
        }
        if !auth.is_logged_in() {
            return Err(Error::LoginFailed);
        }

        let dispatcher = Self::new(config, auth, client);
        match dispatcher.catalog.visible_endpoints(&dispatcher.graph).await {
            Ok(visible) => tracing::info!(?visible, "logged in"),
            // the catalog is loaded again on first use
            Err(err) => tracing::warn!("failed to load permissions: {err}"),
        }
        Ok(dispatcher)
    }

    /// Release everything held for the mount
    pub fn destroy(&self) {
        self.graph.clear();
        self.auth.logout();
        tracing::debug!("filesystem destroyed");
    }

    /// The time that this filesystem was created, reported as the
    /// modification time of anything without one of its own.
    pub fn mount_time(&self) -> SystemTime {
        self.mount_time
    }

    pub async fn classify(&self, path: &str) -> FsResult<PathClassification> {
        let visible = self
            .catalog
            .visible_endpoints(&self.graph)
            .await
            .map_err(|err| fs_error("classify", path, err))?;
        Ok(classify(path, &visible))
    }

    pub async fn getattr(&self, path: &str) -> FsResult<Attr> {
        let target = self.classify(path).await?;
        self.attr_of(&target)
            .await
            .map_err(|err| fs_error("getattr", path, err))
    }

    pub async fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let target = self.classify(path).await?;
        self.entries_of(&target)
            .await
            .map_err(|err| fs_error("readdir", path, err))
    }

    /// Check that a path may be opened with the given access
    pub async fn open(&self, path: &str, mode: AccessMode) -> FsResult<()> {
        use PathClassification::*;
        match self.classify(path).await? {
            Unknown => Err(FsErrorKind::NotFound),
            ResourceFile { .. } if mode == AccessMode::ReadOnly => Ok(()),
            PostFile { .. } if mode == AccessMode::WriteOnly => Ok(()),
            ResourceFile { .. } | PostFile { .. } => Err(FsErrorKind::PermissionDenied),
            _ => Err(FsErrorKind::IsDirectory),
        }
    }

    /// Read up to `size` bytes of a file, starting at `offset`
    pub async fn read(&self, path: &str, offset: u64, size: usize) -> FsResult<Vec<u8>> {
        use PathClassification::*;
        match self.classify(path).await? {
            ResourceFile {
                owner,
                endpoint,
                item,
            } => {
                let (endpoint, document) = self
                    .resource(&owner, &endpoint, &item)
                    .await
                    .map_err(|err| fs_error("read", path, err))?;
                Ok(byte_range(endpoint.display(&document).as_bytes(), offset, size).to_vec())
            }
            PostFile { .. } => Err(FsErrorKind::PermissionDenied),
            Unknown => Err(FsErrorKind::NotFound),
            _ => Err(FsErrorKind::IsDirectory),
        }
    }

    /// Write to a file, returning the number of bytes accepted.
    ///
    /// Each write to a post file creates a new item from the
    /// written text, regardless of offset.
    pub async fn write(&self, path: &str, offset: u64, data: &[u8]) -> FsResult<usize> {
        use PathClassification::*;
        match self.classify(path).await? {
            PostFile { owner, endpoint } => {
                tracing::trace!(%path, offset, len = data.len(), "write");
                self.post(&owner, &endpoint, data)
                    .await
                    .map_err(|err| fs_error("write", path, err))?;
                Ok(data.len())
            }
            ResourceFile { .. } | Unknown => Err(FsErrorKind::PermissionDenied),
            _ => Err(FsErrorKind::IsDirectory),
        }
    }

    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        use PathClassification::*;
        match self.classify(path).await? {
            ResourceFile {
                owner: Owner::Me,
                endpoint,
                item,
            } => self
                .remove(&endpoint, &item)
                .await
                .map_err(|err| fs_error("unlink", path, err)),
            ResourceFile { .. } | PostFile { .. } | Unknown => Err(FsErrorKind::PermissionDenied),
            _ => Err(FsErrorKind::IsDirectory),
        }
    }

    /// Truncating a post file is accepted so that it can be opened
    /// with `O_TRUNC`, nothing else may be truncated.
    pub async fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        use PathClassification::*;
        match self.classify(path).await? {
            PostFile { .. } => {
                tracing::trace!(%path, size, "truncate ignored");
                Ok(())
            }
            ResourceFile { .. } => Err(FsErrorKind::PermissionDenied),
            Unknown => Err(FsErrorKind::NotFound),
            _ => Err(FsErrorKind::IsDirectory),
        }
    }

    fn directory(&self) -> Attr {
        Attr {
            kind: NodeKind::Directory,
            perm: DIRECTORY_MODE,
            size: 0,
            mtime: self.mount_time,
        }
    }

    async fn attr_of(&self, target: &PathClassification) -> Result<Attr> {
        use PathClassification::*;
        match target {
            Root | FriendDir | EndpointDir { .. } => Ok(self.directory()),
            NamedFriendDir { friend } | EndpointUnderFriend { friend, .. } => {
                self.graph.uid_from_name(friend).await?;
                Ok(self.directory())
            }
            ResourceFile {
                owner,
                endpoint,
                item,
            } => {
                let (endpoint, document) = self.resource(owner, endpoint, item).await?;
                Ok(Attr {
                    kind: NodeKind::File,
                    perm: READ_ONLY_MODE,
                    size: endpoint.display(&document).len() as u64,
                    mtime: endpoint.mtime(&document).unwrap_or(self.mount_time),
                })
            }
            PostFile { owner, .. } => {
                self.graph.node_for(owner).await?;
                Ok(Attr {
                    kind: NodeKind::File,
                    perm: WRITE_ONLY_MODE,
                    size: 0,
                    mtime: self.mount_time,
                })
            }
            Unknown => Err(FsErrorKind::NotFound.into()),
        }
    }

    async fn entries_of(&self, target: &PathClassification) -> Result<Vec<DirEntry>> {
        use PathClassification::*;
        let mut entries = vec![
            DirEntry::new(".", NodeKind::Directory),
            DirEntry::new("..", NodeKind::Directory),
        ];
        match target {
            Root => {
                let visible = self.catalog.visible_endpoints(&self.graph).await?;
                entries.extend(visible.iter().map(|e| DirEntry::new(e, NodeKind::Directory)));
            }
            FriendDir => {
                let friends = self.graph.friends().await?;
                let names = self.endpoint(FRIENDS)?.entry_names(&friends);
                entries.extend(names.into_iter().map(|n| DirEntry::new(n, NodeKind::Directory)));
            }
            NamedFriendDir { friend } => {
                self.graph.uid_from_name(friend).await?;
                let visible = self.catalog.visible_endpoints(&self.graph).await?;
                entries.extend(
                    visible
                        .iter()
                        .filter(|e| *e != FRIENDS)
                        .map(|e| DirEntry::new(e, NodeKind::Directory)),
                );
            }
            EndpointDir { endpoint } => {
                entries.extend(self.items_of(&Owner::Me, endpoint).await?);
            }
            EndpointUnderFriend { friend, endpoint } => {
                let owner = Owner::Friend(friend.clone());
                entries.extend(self.items_of(&owner, endpoint).await?);
            }
            ResourceFile { .. } | PostFile { .. } => {
                return Err(FsErrorKind::NotDirectory.into());
            }
            Unknown => return Err(FsErrorKind::NotFound.into()),
        }
        Ok(entries)
    }

    async fn items_of(&self, owner: &Owner, name: &str) -> Result<Vec<DirEntry>> {
        let endpoint = self.endpoint(name)?;
        let node = self.graph.node_for(owner).await?;
        let items = self
            .graph
            .collection(&endpoint.listing_query(&node), self.refresh)
            .await?;
        let mut entries: Vec<_> = endpoint
            .entry_names(&items)
            .into_iter()
            .map(|n| DirEntry::new(n, NodeKind::File))
            .collect();
        if endpoint.is_postable() {
            entries.push(DirEntry::new(POST_FILE_NAME, NodeKind::File));
        }
        Ok(entries)
    }

    fn endpoint(&self, name: &str) -> Result<&'static Endpoint> {
        endpoint::lookup(name).ok_or_else(|| FsErrorKind::NotFound.into())
    }

    async fn resource(
        &self,
        owner: &Owner,
        name: &str,
        item: &str,
    ) -> Result<(&'static Endpoint, Arc<Document>)> {
        let endpoint = self.endpoint(name)?;
        let node = self.graph.node_for(owner).await?;
        let id = self.item_id(endpoint, &node, item).await?;
        let document = self
            .graph
            .get(&endpoint.item_query(&id), self.refresh)
            .await?;
        Ok((endpoint, document))
    }

    /// The remote id of an item, which must be listed for its owner
    async fn item_id(&self, endpoint: &Endpoint, node: &str, item: &str) -> Result<String> {
        let items = self
            .graph
            .collection(&endpoint.listing_query(node), self.refresh)
            .await?;
        endpoint
            .find_item_id(&items, item)
            .ok_or_else(|| Error::UnknownItem {
                endpoint: endpoint.name.to_string(),
                item: item.to_string(),
            })
    }

    async fn post(&self, owner: &Owner, name: &str, data: &[u8]) -> Result<()> {
        let endpoint = self.endpoint(name)?;
        let text = String::from_utf8_lossy(data);
        let message = text.trim_end_matches(['\n', '\r']);
        if message.is_empty() {
            tracing::debug!(endpoint = name, "ignoring empty post");
            return Ok(());
        }
        let node = self.graph.node_for(owner).await?;
        let Some(query) = endpoint.post_query(&node, message) else {
            return Err(FsErrorKind::PermissionDenied.into());
        };
        let response = self.graph.post(&query).await?;
        tracing::info!(endpoint = name, id = ?response.get("id"), "posted");
        self.graph.mark_stale(&endpoint.listing_query(&node));
        Ok(())
    }

    async fn remove(&self, name: &str, item: &str) -> Result<()> {
        let endpoint = self.endpoint(name)?;
        if !endpoint.deletable {
            return Err(FsErrorKind::PermissionDenied.into());
        }
        let id = self.item_id(endpoint, ME, item).await?;
        let user_id = self.graph.user_id().await?;
        let response = self
            .graph
            .delete(&endpoint.delete_query(&user_id, &id))
            .await?;
        let removed = match &*response {
            Value::Bool(ok) => *ok,
            Value::Object(fields) => fields.get("success").and_then(Value::as_bool) == Some(true),
            _ => false,
        };
        if !removed {
            return Err(FsErrorKind::OperationNotPermitted.into());
        }
        tracing::info!(endpoint = name, %item, "removed");
        self.graph.mark_stale(&endpoint.listing_query(ME));
        self.graph.mark_stale(&endpoint.item_query(&id));
        Ok(())
    }
}

/// Log a failed operation, and choose the error to report for it
fn fs_error(op: &str, path: &str, err: Error) -> FsErrorKind {
    let kind = err.fs_error_kind();
    if failure_level(&err, kind) == tracing::Level::WARN {
        tracing::warn!(%op, %path, %kind, "{err}");
    } else {
        tracing::debug!(%op, %path, %kind, "{err}");
    }
    kind
}

/// How loudly a failed operation is logged
fn failure_level(err: &Error, kind: FsErrorKind) -> tracing::Level {
    match (err, kind) {
        // remote refusals are already reported when they are mapped
        (Error::Remote(_), _) | (_, FsErrorKind::NotFound) => tracing::Level::DEBUG,
        _ => tracing::Level::WARN,
    }
}

/// The part of `content` that a read of `size` bytes at `offset` sees
pub fn byte_range(content: &[u8], offset: u64, size: usize) -> &[u8] {
    let Ok(start) = usize::try_from(offset) else {
        return &[];
    };
    if start >= content.len() {
        return &[];
    }
    let end = start.saturating_add(size).min(content.len());
    &content[start..end]
}
