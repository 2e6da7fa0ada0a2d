// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Common macros and argument structures for the graphfs command line

mod args;

pub use args::{Logging, configure_logging, log_filter};

#[doc(hidden)]
pub mod __private {
    pub use graphfs;
}
