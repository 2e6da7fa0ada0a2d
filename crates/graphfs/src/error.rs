// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::io;

use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;

#[cfg(test)]
#[path = "./error_test.rs"]
mod error_test;

pub type Result<T> = std::result::Result<T, Error>;

/// The error type produced by the remote graph when a request
/// reaches the server but is refused.
const OAUTH_EXCEPTION: &str = "OAuthException";

/// The code reported when the referenced object no longer exists
/// or is not visible to the current session.
const OBJECT_NOT_FOUND_CODE: i64 = 803;

/// An `"error"` object returned in the body of a remote response.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Error)]
#[error("{kind} ({code}): {message}")]
pub struct RemoteError {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl RemoteError {
    pub fn new<K, M>(kind: K, code: i64, message: M) -> Self
    where
        K: Into<String>,
        M: Into<String>,
    {
        Self {
            kind: kind.into(),
            code,
            message: message.into(),
        }
    }
}

#[derive(Diagnostic, Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("Request timed out: {0}")]
    #[diagnostic(help("The remote graph did not answer in time, try again"))]
    Timeout(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Unexpected response shape: {0}")]
    UnexpectedResponse(String),
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("You are not logged in, so the program cannot fetch your profile. Terminating.")]
    #[diagnostic(code("graphfs::login_failed"))]
    LoginFailed,
    #[error("No friend named '{0}'")]
    UnknownFriend(String),
    #[error("No item named '{item}' in {endpoint}")]
    UnknownItem { endpoint: String, item: String },
    #[error("Filesystem error: {0}")]
    Filesystem(FsErrorKind),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    IO(#[from] io::Error),
    #[error("{0}")]
    String(String),
}

impl From<String> for Error {
    fn from(err: String) -> Error {
        Error::String(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Error {
        Error::String(err.to_string())
    }
}

impl From<FsErrorKind> for Error {
    fn from(kind: FsErrorKind) -> Error {
        Error::Filesystem(kind)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Error {
        if err.is_timeout() {
            let target = err
                .url()
                .map(|u| u.path().to_string())
                .unwrap_or_default();
            return Error::Timeout(target);
        }
        Error::Transport(err.to_string())
    }
}

/// The filesystem-level outcome of a failed operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum FsErrorKind {
    NotFound,
    PermissionDenied,
    OperationNotPermitted,
    ResourceUnavailable,
    TimedOut,
    IsDirectory,
    NotDirectory,
    Io,
}

impl FsErrorKind {
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::PermissionDenied => libc::EACCES,
            Self::OperationNotPermitted => libc::EPERM,
            Self::ResourceUnavailable => libc::EAGAIN,
            Self::TimedOut => libc::ETIMEDOUT,
            Self::IsDirectory => libc::EISDIR,
            Self::NotDirectory => libc::ENOTDIR,
            Self::Io => libc::EIO,
        }
    }
}

/// Translate a refusal from the remote graph into a filesystem error.
pub fn map_remote_error(error: &RemoteError) -> FsErrorKind {
    let kind = if error.kind == OAUTH_EXCEPTION {
        if error.code == OBJECT_NOT_FOUND_CODE {
            FsErrorKind::NotFound
        } else {
            FsErrorKind::PermissionDenied
        }
    } else {
        FsErrorKind::OperationNotPermitted
    };
    tracing::warn!(
        kind = %error.kind,
        code = error.code,
        mapped = %kind,
        "{}",
        error.message
    );
    kind
}

impl Error {
    /// The filesystem error that this failure should be reported as.
    pub fn fs_error_kind(&self) -> FsErrorKind {
        match self {
            Error::Remote(err) => map_remote_error(err),
            Error::Timeout(_) => FsErrorKind::TimedOut,
            Error::UnexpectedResponse(_) => FsErrorKind::ResourceUnavailable,
            Error::NotLoggedIn | Error::LoginFailed => FsErrorKind::PermissionDenied,
            Error::UnknownFriend(_) | Error::UnknownItem { .. } => FsErrorKind::NotFound,
            Error::Filesystem(kind) => *kind,
            Error::IO(err) => match err.kind() {
                io::ErrorKind::NotFound => FsErrorKind::NotFound,
                io::ErrorKind::PermissionDenied => FsErrorKind::PermissionDenied,
                io::ErrorKind::TimedOut => FsErrorKind::TimedOut,
                _ => FsErrorKind::Io,
            },
            Error::Transport(_)
            | Error::Json(_)
            | Error::Config(_)
            | Error::Url(_)
            | Error::String(_) => FsErrorKind::Io,
        }
    }
}

/// Errors that can be reported to the operating system as an errno
pub trait OsError {
    /// The errno to reply with, if this error has one
    fn os_error(&self) -> Option<i32>;
}

impl OsError for FsErrorKind {
    fn os_error(&self) -> Option<i32> {
        Some(self.errno())
    }
}

impl OsError for Error {
    fn os_error(&self) -> Option<i32> {
        match self {
            Error::IO(err) => err.os_error().or(Some(libc::EIO)),
            err => Some(err.fs_error_kind().errno()),
        }
    }
}

impl OsError for io::Error {
    fn os_error(&self) -> Option<i32> {
        self.raw_os_error()
    }
}
