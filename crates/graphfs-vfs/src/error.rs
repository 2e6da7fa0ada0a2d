// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use graphfs::OsError;
use thiserror::Error;

/// Errors specific to fuse operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The kernel referred to an inode that was never handed out
    #[error("Unknown inode {0}")]
    UnknownInode(u64),

    /// The kernel referred to a handle that is not open
    #[error("Unknown file handle {0}")]
    UnknownHandle(u64),

    /// A file name that cannot be represented in the graph
    #[error("Invalid file name {0:?}")]
    InvalidName(std::ffi::OsString),
}

impl OsError for Error {
    fn os_error(&self) -> Option<i32> {
        match self {
            Error::UnknownInode(_) => Some(libc::ENOENT),
            Error::UnknownHandle(_) => Some(libc::EBADF),
            Error::InvalidName(_) => Some(libc::EINVAL),
        }
    }
}
