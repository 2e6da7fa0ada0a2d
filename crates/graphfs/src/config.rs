// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Result;

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

static SYSTEM_CONFIG: &str = "/etc/graphfs";
static ENV_PREFIX: &str = "GRAPHFS_";

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Api {
    /// The address of the remote graph
    pub base_url: String,

    /// The api version to address, eg: v2.0
    ///
    /// When empty, requests are made against the unversioned api.
    pub version: String,

    /// Maximum number of seconds to wait for any single request
    pub timeout_seconds: u64,

    /// Maximum number of pages to follow when listing a collection
    pub max_pages: usize,
}

impl Default for Api {
    fn default() -> Self {
        Self {
            base_url: "https://graph.facebook.com".into(),
            version: String::new(),
            timeout_seconds: 30,
            max_pages: 1,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Auth {
    /// The application id presented to the login dialog
    pub client_id: String,

    /// The address of the login dialog
    pub dialog_url: String,

    /// Where the login dialog redirects once complete
    pub redirect_uri: String,

    /// A pre-obtained access token, skips the interactive login if set
    pub access_token: Option<String>,

    /// How many times to try logging in before giving up
    pub login_attempts: u32,

    /// Open the login dialog in a browser, in addition to printing it
    pub open_browser: bool,

    /// Permissions requested for both the user and their friends
    pub permissions: Vec<String>,

    /// Additional permissions requested as-is
    pub extended_permissions: Vec<String>,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            client_id: "732872016745752".into(),
            dialog_url: "https://www.facebook.com/dialog/oauth".into(),
            redirect_uri: "https://www.facebook.com/connect/login_success.html".into(),
            access_token: None,
            login_attempts: 3,
            open_browser: true,
            permissions: vec!["status".into()],
            extended_permissions: vec!["publish_actions".into()],
        }
    }
}

/// How a friend's name is resolved to their remote id
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FriendLookup {
    /// Search the listing of the user's friends
    #[default]
    Listing,
    /// Ask the remote with an FQL statement
    Fql,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Filesystem {
    /// The endpoints that may be shown, when permitted
    pub endpoints: Vec<String>,

    /// How friend names in paths are turned into remote ids
    pub friend_lookup: FriendLookup,

    /// How long the kernel may cache attributes and entries
    pub attr_ttl_seconds: u64,

    /// Fetch listings and items from the remote on every access,
    /// instead of only after a change made through this mount
    pub refresh_listings: bool,
}

impl Default for Filesystem {
    fn default() -> Self {
        Self {
            endpoints: vec!["albums".into(), "friends".into(), "status".into()],
            friend_lookup: FriendLookup::default(),
            attr_ttl_seconds: 1,
            refresh_listings: false,
        }
    }
}

/// Configuration values for graphfs.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    // These sub-types should aim to only have one level of
    // values within them, otherwise they become impossible to address
    // with environment variables.
    pub api: Api,
    pub auth: Auth,
    pub filesystem: Filesystem,
}

impl Config {
    /// Load a config from a string in the given format, mostly for testing
    pub fn load_string<S: AsRef<str>>(conf: S, format: config::FileFormat) -> Result<Self> {
        let raw = config::Config::builder()
            .add_source(config::File::from_str(conf.as_ref(), format))
            .build()?;
        Ok(Config::deserialize(raw)?)
    }
}

fn user_config() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("graphfs").join("graphfs"))
}

/// Load the graphfs configuration from disk.
///
/// This includes the default, user, and system configurations (if they exist),
/// followed by any `GRAPHFS_<SECTION>_<NAME>` environment variables.
pub fn load_config() -> Result<Config> {
    load_config_from(std::env::vars())
}

pub(crate) fn load_config_from<I>(vars: I) -> Result<Config>
where
    I: IntoIterator<Item = (String, String)>,
{
    use config::{Config as RawConfig, File};

    // the system and user configs can be in any supported format: toml, yaml, json, ini, etc
    let mut config_builder =
        RawConfig::builder().add_source(File::with_name(SYSTEM_CONFIG).required(false));
    if let Some(user_config) = user_config() {
        config_builder = config_builder
            .add_source(File::with_name(&format!("{}", user_config.display())).required(false));
    }

    for (var, value) in vars {
        let Some(tail) = var.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let Some((section, name)) = tail.split_once('_') else {
            // a value with no section is not a configuration
            // value, and can be skipped (eg: GRAPHFS_LOG)
            continue;
        };

        let key = format!("{}.{}", section.to_lowercase(), name.to_lowercase());
        config_builder = config_builder.set_override(key, value)?;
    }

    let config = config_builder.build()?;
    Ok(Config::deserialize(config)?)
}
