// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;

#[cfg(test)]
#[path = "./args_test.rs"]
mod args_test;

const GRAPHFS_LOG: &str = "GRAPHFS_LOG";

/// Command line flags for configuring logging
#[derive(Debug, Clone, clap::Args)]
pub struct Logging {
    /// Make output more verbose, can be specified more than once
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to this file instead of stderr
    #[clap(long, global = true, env = "GRAPHFS_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Logging {
    pub fn configure(&self) -> Result<()> {
        configure_logging(self.verbose as usize, self.log_file.as_deref())
    }
}

/// The log filter directives for a verbosity level.
///
/// At the default verbosity, an existing `GRAPHFS_LOG` value is used
/// as-is. Any `RUST_LOG` value is always appended.
pub fn log_filter(verbosity: usize, existing: Option<String>, overrides: Option<String>) -> String {
    let mut config = match verbosity {
        0 => existing.unwrap_or_else(|| "graphfs=info,warn".to_string()),
        1 => "graphfs=debug,info".to_string(),
        2 => "graphfs=trace,info".to_string(),
        3 => "graphfs=trace,debug".to_string(),
        _ => "trace".to_string(),
    };
    if let Some(overrides) = overrides {
        config.push(',');
        config.push_str(&overrides);
    }
    config
}

pub fn configure_logging(verbosity: usize, log_file: Option<&Path>) -> Result<()> {
    let config = log_filter(
        verbosity,
        std::env::var(GRAPHFS_LOG).ok(),
        std::env::var("RUST_LOG").ok(),
    );
    let env_filter = tracing_subscriber::filter::EnvFilter::try_new(&config)
        .with_context(|| format!("Invalid log filter: {config}"))?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .without_time()
        .with_target(verbosity > 2);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let file_log = fmt_layer
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file));
            tracing_subscriber::registry()
                .with(file_log.with_filter(env_filter))
                .try_init()?;
        }
        None => {
            let stderr_log = fmt_layer.with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(stderr_log.with_filter(env_filter))
                .try_init()?;
        }
    }
    Ok(())
}

/// Turn the result of a command into an exit code, reporting any error
#[macro_export]
macro_rules! handle_result {
    ($result:ident) => {{
        match $result {
            Err(err) => match err.root_cause().downcast_ref::<$crate::__private::graphfs::Error>() {
                Some(login @ $crate::__private::graphfs::Error::LoginFailed) => {
                    eprintln!("{login}");
                    1
                }
                _ => {
                    tracing::error!("{err:?}");
                    1
                }
            },
            Ok(code) => code,
        }
    }};
}
