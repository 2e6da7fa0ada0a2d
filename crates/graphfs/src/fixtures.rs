// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Test doubles for the remote graph and its login.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rstest::fixture;
use serde_json::json;

use crate::auth::Authenticator;
use crate::endpoint::{self, ALBUMS, FRIENDS, STATUS};
use crate::permissions::PermissionCatalog;
use crate::query::{FqlQuery, ME, Method, ResourceQuery};
use crate::remote::GraphClient;
use crate::{Document, Error, RemoteError, Result};

pub fn init_logging() {
    let sub = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::TRACE)
        .without_time()
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(sub);
}

/// A canned answer from the [`FakeClient`]
#[derive(Clone, Debug)]
pub enum FakeResponse {
    Document(Document),
    Remote(RemoteError),
    Timeout,
}

impl FakeResponse {
    fn into_result(self, query: &str) -> Result<Document> {
        match self {
            Self::Document(d) => Ok(d),
            Self::Remote(e) => Err(Error::Remote(e)),
            Self::Timeout => Err(Error::Timeout(query.to_string())),
        }
    }
}

impl From<Document> for FakeResponse {
    fn from(document: Document) -> Self {
        Self::Document(document)
    }
}

impl From<RemoteError> for FakeResponse {
    fn from(error: RemoteError) -> Self {
        Self::Remote(error)
    }
}

/// A [`GraphClient`] that answers from canned responses and
/// records every request that it receives.
///
/// Requests without a canned response are refused the way the
/// remote refuses a missing object.
#[derive(Default)]
pub struct FakeClient {
    responses: Mutex<HashMap<(Method, ResourceQuery), FakeResponse>>,
    fql_responses: Mutex<HashMap<FqlQuery, FakeResponse>>,
    calls: Mutex<Vec<(Method, String)>>,
    delay: Option<Duration>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long before answering each request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn respond<R: Into<FakeResponse>>(&self, method: Method, query: &ResourceQuery, response: R) {
        self.responses
            .lock()
            .unwrap()
            .insert((method, query.clone()), response.into());
    }

    pub fn respond_fql<R: Into<FakeResponse>>(&self, query: &FqlQuery, response: R) {
        self.fql_responses
            .lock()
            .unwrap()
            .insert(query.clone(), response.into());
    }

    /// Every request made so far, as `(method, query)`
    pub fn calls(&self) -> Vec<(Method, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// The number of times that a query was requested with a method
    pub fn call_count(&self, method: Method, query: &ResourceQuery) -> usize {
        let query = query.to_string();
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, q)| *m == method && *q == query)
            .count()
    }

    async fn answer(&self, method: Method, key: String, response: Option<FakeResponse>) -> Result<Document> {
        self.calls.lock().unwrap().push((method, key.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        response
            .unwrap_or_else(|| {
                RemoteError::new(
                    "OAuthException",
                    803,
                    format!("(#803) Some of the aliases you requested do not exist: {key}"),
                )
                .into()
            })
            .into_result(&key)
    }
}

#[async_trait::async_trait]
impl GraphClient for FakeClient {
    async fn call(&self, query: &ResourceQuery, method: Method) -> Result<Document> {
        let response = self
            .responses
            .lock()
            .unwrap()
            .get(&(method, query.clone()))
            .cloned();
        self.answer(method, query.to_string(), response).await
    }

    async fn fql(&self, query: &FqlQuery) -> Result<Document> {
        let response = self.fql_responses.lock().unwrap().get(query).cloned();
        self.answer(Method::Read, format!("fql?q={query}"), response)
            .await
    }
}

/// An [`Authenticator`] that logs in after a number of failed attempts.
#[derive(Debug, Default)]
pub struct FakeLogin {
    failures: u32,
    attempts: AtomicU32,
    token: Mutex<Option<String>>,
}

impl FakeLogin {
    /// A login that fails this many times before succeeding
    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Authenticator for FakeLogin {
    fn is_logged_in(&self) -> bool {
        self.access_token().is_some()
    }

    fn login(&self, _scopes: &[String]) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(Error::LoginFailed);
        }
        self.token.lock().unwrap().replace("fake-token".into());
        Ok(())
    }

    fn access_token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    fn logout(&self) {
        self.token.lock().unwrap().take();
    }
}

pub fn status_listing(node: &str) -> ResourceQuery {
    endpoint::lookup(STATUS).unwrap().listing_query(node)
}

pub fn album_listing(node: &str) -> ResourceQuery {
    endpoint::lookup(ALBUMS).unwrap().listing_query(node)
}

pub fn friend_listing() -> ResourceQuery {
    endpoint::lookup(FRIENDS).unwrap().listing_query(ME)
}

pub fn permissions_query() -> ResourceQuery {
    PermissionCatalog::permissions_query()
}

pub fn user_id_query() -> ResourceQuery {
    ResourceQuery::new(ME).with_parameter("fields", "id")
}

/// A small graph: the user `42`, with two statuses and an album,
/// and a friend named Bob Jones (`77`) who has one status.
///
/// Statuses, albums and friends are permitted, photos are not.
#[fixture]
pub fn fake_graph() -> FakeClient {
    let client = FakeClient::new();
    client.respond(
        Method::Read,
        &permissions_query(),
        json!({"data": [
            {"permission": "user_status", "status": "granted"},
            {"permission": "friends_status", "status": "granted"},
            {"permission": "user_friends", "status": "granted"},
            {"permission": "user_albums", "status": "granted"},
            {"permission": "user_photos", "status": "declined"},
        ]}),
    );
    client.respond(Method::Read, &user_id_query(), json!({"id": "42"}));
    client.respond(
        Method::Read,
        &status_listing(ME),
        json!({"data": [
            {"id": "101", "message": "Hello, world", "updated_time": 1400000000},
            {"id": "102", "message": "Second post", "updated_time": 1400000100},
            {"id": "103", "updated_time": 1400000200},
        ]}),
    );
    client.respond(
        Method::Read,
        &endpoint::lookup(STATUS).unwrap().item_query("101"),
        json!({"id": "101", "message": "Hello, world", "updated_time": 1400000000}),
    );
    client.respond(
        Method::Read,
        &friend_listing(),
        json!({"data": [
            {"id": "77", "name": "Bob Jones"},
            {"id": "78", "name": "Bob Jones"},
            {"id": "79", "name": "Carol"},
        ]}),
    );
    client.respond(
        Method::Read,
        &status_listing("77"),
        json!({"data": [
            {"id": "701", "message": "Bob was here", "updated_time": 1400000300},
        ]}),
    );
    client.respond(
        Method::Read,
        &album_listing(ME),
        json!({"data": [{"id": "501", "name": "Trips"}]}),
    );
    client
}
