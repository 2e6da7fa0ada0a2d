// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::sync::Arc;
use std::time::Duration;

use crate::auth::Authenticator;
use crate::query::{FqlQuery, Method, ResourceQuery};
use crate::{Document, Error, RemoteError, Result, config};

#[cfg(test)]
#[path = "./remote_test.rs"]
mod remote_test;

const ACCESS_TOKEN: &str = "access_token";

/// Performs requests against the remote graph.
///
/// Implementations return the parsed body of a successful request,
/// or [`Error::Remote`] when the remote answered with an error payload.
#[async_trait::async_trait]
pub trait GraphClient: Send + Sync {
    /// Perform the given query using the provided method
    async fn call(&self, query: &ResourceQuery, method: Method) -> Result<Document>;

    /// Run an FQL statement against the remote graph
    async fn fql(&self, query: &FqlQuery) -> Result<Document>;
}

/// A [`GraphClient`] that talks to the remote graph over https.
pub struct HttpGraphClient {
    http: reqwest::Client,
    base: url::Url,
    version: String,
    auth: Arc<dyn Authenticator>,
}

impl HttpGraphClient {
    pub fn new(api: &config::Api, auth: Arc<dyn Authenticator>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.timeout_seconds))
            .user_agent(concat!("graphfs/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base = url::Url::parse(&api.base_url)?;
        if base.cannot_be_a_base() {
            return Err(Error::String(format!(
                "Invalid graph api address: {}",
                api.base_url
            )));
        }
        Ok(Self {
            http,
            base,
            version: api.version.clone(),
            auth,
        })
    }

    /// The full address of a location in the graph, eg: `me/statuses`
    pub fn url_for(&self, path: &str) -> Result<url::Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::String(format!("Invalid graph api address: {}", self.base)))?;
            segments.pop_if_empty();
            if !self.version.is_empty() {
                segments.push(&self.version);
            }
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    fn access_token(&self) -> Result<String> {
        self.auth.access_token().ok_or(Error::NotLoggedIn)
    }
}

#[async_trait::async_trait]
impl GraphClient for HttpGraphClient {
    async fn call(&self, query: &ResourceQuery, method: Method) -> Result<Document> {
        let token = self.access_token()?;
        let mut url = self.url_for(&query.path())?;
        tracing::debug!(%method, %query, "graph request");

        let request = match method {
            Method::Read | Method::Delete => {
                url.query_pairs_mut()
                    .extend_pairs(query.parameters())
                    .append_pair(ACCESS_TOKEN, &token);
                match method {
                    Method::Read => self.http.get(url),
                    _ => self.http.delete(url),
                }
            }
            Method::Write => {
                let mut form: Vec<(&str, &str)> = query
                    .parameters()
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                form.push((ACCESS_TOKEN, token.as_str()));
                self.http.post(url).form(&form)
            }
        };

        let body = request.send().await?.bytes().await?;
        parse_response(&body)
    }

    async fn fql(&self, query: &FqlQuery) -> Result<Document> {
        let token = self.access_token()?;
        let mut url = self.url_for("fql")?;
        url.query_pairs_mut()
            .append_pair("q", query.text())
            .append_pair(ACCESS_TOKEN, &token);
        tracing::debug!(%query, "fql request");
        let body = self.http.get(url).send().await?.bytes().await?;
        parse_response(&body)
    }
}

/// Parse a response body, separating remote error payloads
/// from successful documents.
pub fn parse_response(body: &[u8]) -> Result<Document> {
    let document: Document = serde_json::from_slice(body)?;
    if let Some(error) = document.get("error") {
        let error: RemoteError = serde_json::from_value(error.clone())?;
        return Err(Error::Remote(error));
    }
    Ok(document)
}
