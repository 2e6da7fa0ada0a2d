// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! FUSE frontend for graphfs
//!
//! Translates kernel requests into calls on a [`graphfs::Dispatcher`],
//! assigning inode numbers and file handles along the way.

mod error;
mod fuse;
mod table;

pub use error::Error;
pub use fuse::{Config, Session};
pub use table::ROOT_INODE;
