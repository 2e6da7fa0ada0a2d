// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use fuser::MountOption;
use graphfs::auth::{Authenticator, PromptLogin, StaticToken};
use graphfs::remote::HttpGraphClient;
use graphfs::{Dispatcher, Error};
use graphfs_cli_common as cli;
use graphfs_vfs::{Config, Session};
use tokio::signal::unix::{SignalKind, signal};

#[cfg(test)]
#[path = "./cmd_fuse_test.rs"]
mod cmd_fuse_test;

fn main() {
    // because this function exits right away it does not
    // properly handle destruction of data, so we put the actual
    // logic into a separate function/scope
    std::process::exit(main2())
}

fn main2() -> i32 {
    let opt = CmdFuse::parse();
    if let Err(err) = opt.logging.configure() {
        eprintln!("{err:?}");
        return 1;
    }

    let config = match graphfs::load_config() {
        Err(err) => {
            tracing::error!(err = ?err, "failed to load config");
            return 1;
        }
        Ok(config) => config,
    };
    let result = opt.run(config);

    cli::handle_result!(result)
}

/// Mount the remote graph as a filesystem
///
/// The filesystem runs in the foreground until it is unmounted,
/// or until this process is interrupted.
#[derive(Debug, Parser)]
#[clap(name = "graphfs-fuse")]
pub struct CmdFuse {
    #[clap(flatten)]
    logging: cli::Logging,

    /// Options for the mount in the form opt1,opt2=value
    ///
    /// In addition to all existing fuse mount options, the following custom
    /// options are also supported:
    ///
    ///  uid    - the user id that should own all files in the mount, defaults to
    ///           the effective user id of the caller. Only allowed when running
    ///           as root/sudo.
    ///  gid    - the group id that should own all files in the mount, defaults to
    ///           the effective group id of the caller. Only allowed when running
    ///           as root/sudo.
    #[clap(long, short, value_delimiter = ',')]
    options: Vec<String>,

    /// Use this access token instead of logging in interactively
    #[clap(long, env = "GRAPHFS_AUTH_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// The location where to mount the graph
    mountpoint: std::path::PathBuf,
}

impl CmdFuse {
    pub fn run(&self, mut config: graphfs::Config) -> Result<i32> {
        if let Some(token) = &self.access_token {
            config.auth.access_token = Some(token.clone());
        }
        let opts = self.fuse_config(&config)?;
        tracing::debug!("FUSE Config: {opts:#?}");

        let calling_uid = nix::unistd::geteuid();
        let calling_gid = nix::unistd::getegid();
        if opts.gid != calling_gid {
            nix::unistd::setgid(opts.gid).context("Failed to set desired group (actual)")?;
            nix::unistd::setegid(opts.gid).context("Failed to set desired group (effective)")?;
        }
        if opts.uid != calling_uid {
            nix::unistd::setuid(opts.uid).context("Failed to become desired user (actual)")?;
            nix::unistd::seteuid(opts.uid).context("Failed to become desired user (effective)")?;
        }

        let mountpoint = self
            .mountpoint
            .canonicalize()
            .context("Invalid mount point")?;
        if !calling_uid.is_root() {
            // unprivileged callers must have write access to the directory that
            // they are trying to mount over.
            nix::unistd::access(&mountpoint, nix::unistd::AccessFlags::W_OK)
                .context("Must have write access to mountpoint")?;
        }

        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("Failed to establish runtime")?;

        let auth: Arc<dyn Authenticator> = match &config.auth.access_token {
            Some(token) => Arc::new(StaticToken::new(token.clone())),
            None => Arc::new(PromptLogin::new(config.auth.clone())),
        };
        let client = Arc::new(HttpGraphClient::new(&config.api, Arc::clone(&auth))?);
        let dispatcher = rt.block_on(Dispatcher::init(&config, auth, client))?;
        eprintln!("You are now logged into Facebook.");

        tracing::debug!("Establishing fuse session...");
        let mount_opts = opts.mount_options.iter().cloned().collect::<Vec<_>>();
        let mut session = fuser::Session::new(
            Session::new(Arc::new(dispatcher), opts),
            &mountpoint,
            &mount_opts,
        )
        .context("Failed to create a FUSE session")?;
        let mut unmounter = session.unmount_callable();

        let result = rt.block_on(async move {
            let mut interrupt = signal(SignalKind::interrupt()).context("interrupt signal handler")?;
            let mut quit = signal(SignalKind::quit()).context("quit signal handler")?;
            let mut terminate = signal(SignalKind::terminate()).context("terminate signal handler")?;

            tracing::info!(mountpoint = %mountpoint.display(), "Starting FUSE filesystem");
            // the session blocks its thread, but requests are
            // answered on the runtime
            let mut fut = tokio::task::spawn_blocking(move || session.run());
            let received = tokio::select! {
                res = &mut fut => {
                    tracing::info!("Filesystem shutting down");
                    return res.context("FUSE session failed")?.context("FUSE session failed");
                }
                _ = terminate.recv() => "Terminate",
                _ = interrupt.recv() => "Interrupt",
                _ = quit.recv() => "Quit",
            };
            tracing::info!("{received} signal received, filesystem shutting down");
            unmounter.unmount().context("Failed to unmount filesystem")?;
            fut.await
                .context("FUSE session failed")?
                .context("FUSE session failed")
        });

        // requests may still be waiting on the remote, and
        // there is no reason to wait for them to finish
        rt.shutdown_timeout(Duration::from_secs(2));
        result?;
        Ok(0)
    }

    fn fuse_config(&self, config: &graphfs::Config) -> Result<Config> {
        let calling_uid = nix::unistd::geteuid();
        let calling_gid = nix::unistd::getegid();

        let required_opts = vec![
            MountOption::NoDev,
            MountOption::NoSuid,
            MountOption::DefaultPermissions,
            MountOption::FSName("graphfs".into()),
            MountOption::Subtype("graphfs".into()),
        ];
        let mut opts = Config {
            uid: calling_uid,
            gid: calling_gid,
            mount_options: required_opts.into_iter().collect(),
            ttl: Duration::from_secs(config.filesystem.attr_ttl_seconds),
        };

        for option in parse_options_from_args(&self.options) {
            let MountOption::CUSTOM(opt) = option else {
                opts.mount_options.insert(option);
                continue;
            };
            match opt.split_once('=') {
                Some(("uid", num)) if calling_uid.is_root() => {
                    opts.uid = num
                        .parse::<u32>()
                        .map(nix::unistd::Uid::from_raw)
                        .map_err(|err| {
                            Error::String(format!("Invalid parameter value for uid={num}: {err}"))
                        })?
                }
                Some(("gid", num)) if calling_uid.is_root() => {
                    opts.gid = num
                        .parse::<u32>()
                        .map(nix::unistd::Gid::from_raw)
                        .map_err(|err| {
                            Error::String(format!("Invalid parameter value for gid={num}: {err}"))
                        })?
                }
                Some(("uid", _)) | Some(("gid", _)) => {
                    bail!("Must be root to launch with alternate uid/gid");
                }
                _ => bail!("Unsupported mount option, or missing value: {opt}"),
            }
        }

        if opts.mount_options.contains(&MountOption::RO) {
            bail!("ro mode is not supported, posting requires a writable mount");
        }
        Ok(opts)
    }
}

/// Parse mount options the same way as the private `fuser::MountOption::from_str`
fn parse_options_from_args(args: &[String]) -> Vec<MountOption> {
    args.iter()
        .map(|s| match s.as_str() {
            "auto_unmount" => MountOption::AutoUnmount,
            "allow_other" => MountOption::AllowOther,
            "allow_root" => MountOption::AllowRoot,
            "default_permissions" => MountOption::DefaultPermissions,
            "dev" => MountOption::Dev,
            "nodev" => MountOption::NoDev,
            "suid" => MountOption::Suid,
            "nosuid" => MountOption::NoSuid,
            "ro" => MountOption::RO,
            "rw" => MountOption::RW,
            "exec" => MountOption::Exec,
            "noexec" => MountOption::NoExec,
            "atime" => MountOption::Atime,
            "noatime" => MountOption::NoAtime,
            "dirsync" => MountOption::DirSync,
            "sync" => MountOption::Sync,
            "async" => MountOption::Async,
            x => match (x.strip_prefix("fsname="), x.strip_prefix("subtype=")) {
                (Some(name), _) => MountOption::FSName(name.into()),
                (_, Some(subtype)) => MountOption::Subtype(subtype.into()),
                _ => MountOption::CUSTOM(x.into()),
            },
        })
        .collect()
}
