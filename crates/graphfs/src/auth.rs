// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::io::BufRead;
use std::sync::RwLock;

use crate::{Error, Result, config};

#[cfg(test)]
#[path = "./auth_test.rs"]
mod auth_test;

/// Provides the credentials used for every remote call.
pub trait Authenticator: Send + Sync {
    /// True once an access token is available
    fn is_logged_in(&self) -> bool;

    /// Obtain an access token granting the given permission scopes.
    ///
    /// This may block, and may prompt the user.
    fn login(&self, scopes: &[String]) -> Result<()>;

    /// The current access token, if logged in
    fn access_token(&self) -> Option<String>;

    /// Forget the current access token
    fn logout(&self);
}

/// The permission scopes to request for a login.
///
/// Each base permission is requested for both the user and their
/// friends, followed by any extended permissions as given.
pub fn requested_scopes(permissions: &[String], extended: &[String]) -> Vec<String> {
    permissions
        .iter()
        .flat_map(|p| [format!("user_{p}"), format!("friends_{p}")])
        .chain(extended.iter().cloned())
        .collect()
}

/// An authenticator that serves an access token that was
/// obtained ahead of time.
#[derive(Debug, Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl Authenticator for StaticToken {
    fn is_logged_in(&self) -> bool {
        self.access_token().is_some()
    }

    fn login(&self, _scopes: &[String]) -> Result<()> {
        Ok(())
    }

    fn access_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    fn logout(&self) {
        if let Ok(mut token) = self.token.write() {
            token.take();
        }
    }
}

/// An authenticator that walks the user through the login dialog.
///
/// The dialog address is printed (and opened in a browser when possible),
/// and the user pastes back the address they were redirected to, which
/// carries the access token in its fragment.
#[derive(Debug)]
pub struct PromptLogin {
    auth: config::Auth,
    token: RwLock<Option<String>>,
}

impl PromptLogin {
    pub fn new(auth: config::Auth) -> Self {
        Self {
            auth,
            token: RwLock::new(None),
        }
    }

    /// The address of the login dialog for the given scopes
    pub fn dialog_url(&self, scopes: &[String]) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.auth.dialog_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.auth.client_id)
            .append_pair("redirect_uri", &self.auth.redirect_uri)
            .append_pair("response_type", "token")
            .append_pair("scope", &scopes.join(","));
        Ok(url)
    }

    /// Run the login exchange, reading the redirected address from `input`
    pub fn login_with(&self, scopes: &[String], input: &mut dyn BufRead) -> Result<()> {
        let dialog = self.dialog_url(scopes)?;
        if self.auth.open_browser {
            open_browser(dialog.as_str());
        }
        eprintln!("Log in by visiting the following address:\n\n    {dialog}\n");
        eprintln!("Then paste the address that you were redirected to:");

        let mut line = String::new();
        input.read_line(&mut line)?;
        let Some(token) = parse_login_response(&line, &self.auth.redirect_uri) else {
            tracing::debug!("login response did not contain an access token");
            return Err(Error::LoginFailed);
        };
        let mut current = self
            .token
            .write()
            .map_err(|err| Error::String(err.to_string()))?;
        current.replace(token);
        Ok(())
    }
}

impl Authenticator for PromptLogin {
    fn is_logged_in(&self) -> bool {
        self.access_token().is_some()
    }

    fn login(&self, scopes: &[String]) -> Result<()> {
        if self.is_logged_in() {
            return Ok(());
        }
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        self.login_with(scopes, &mut input)
    }

    fn access_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    fn logout(&self) {
        if let Ok(mut token) = self.token.write() {
            token.take();
        }
    }
}

/// Extract the access token from the address that the login
/// dialog redirected to.
///
/// Returns `None` if the address is not the expected redirect, if
/// the login was refused, or if no token is present.
pub fn parse_login_response(response: &str, redirect_uri: &str) -> Option<String> {
    let url = url::Url::parse(response.trim()).ok()?;
    let expected = url::Url::parse(redirect_uri).ok()?;
    if url.origin() != expected.origin() || url.path() != expected.path() {
        return None;
    }
    if url.query_pairs().any(|(key, _)| key == "error") {
        return None;
    }
    let fragment = url.fragment()?;
    url::form_urlencoded::parse(fragment.as_bytes())
        .find(|(key, _)| key == "access_token")
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.is_empty())
}

fn open_browser(address: &str) {
    // best effort, the address is also printed for the user
    match std::process::Command::new("xdg-open")
        .arg(address)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
    {
        Ok(_) => tracing::debug!("opened login dialog in browser"),
        Err(err) => tracing::debug!("could not open a browser: {err}"),
    }
}
