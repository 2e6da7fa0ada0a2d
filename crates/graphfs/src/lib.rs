// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! A filesystem view of a remote, permission-gated social graph.
//!
//! Paths in the mounted tree are classified into graph resources,
//! fetched through a memoizing query cache, and presented as
//! directories and files. See [`dispatch::Dispatcher`] for the
//! operations that a filesystem frontend calls into.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

pub mod auth;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod endpoint;
mod error;
pub mod graph;
pub mod permissions;
pub mod query;
pub mod remote;
pub mod resolve;

/// A parsed response from the remote graph
pub type Document = serde_json::Value;

pub use dispatch::{AccessMode, Attr, DirEntry, Dispatcher, FsResult, NodeKind};
pub use error::{Error, FsErrorKind, OsError, RemoteError, Result, map_remote_error};

pub use self::config::{Config, load_config};
