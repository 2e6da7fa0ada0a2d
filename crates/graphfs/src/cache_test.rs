// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use serde_json::json;

use super::QueryCache;
use crate::fixtures::*;
use crate::query::{FqlQuery, ME, Method, ResourceQuery};
use crate::{Error, RemoteError};

fn cache_over(client: &Arc<FakeClient>) -> QueryCache {
    QueryCache::new(client.clone())
}

#[rstest]
#[tokio::test]
async fn test_cache_hit_avoids_remote(fake_graph: FakeClient) {
    init_logging();
    let client = Arc::new(fake_graph);
    let cache = cache_over(&client);
    let query = status_listing(ME);

    let first = cache.fetch(&query, Method::Read, false).await.unwrap();
    let second = cache.fetch(&query, Method::Read, false).await.unwrap();
    assert_eq!(first, second);
    assert!(cache.contains(&query));
    assert_eq!(client.call_count(Method::Read, &query), 1);
}

#[rstest]
#[tokio::test]
async fn test_force_refresh_calls_remote_once(fake_graph: FakeClient) {
    init_logging();
    let client = Arc::new(fake_graph);
    let cache = cache_over(&client);
    let query = user_id_query();

    cache.fetch(&query, Method::Read, false).await.unwrap();
    client.respond(Method::Read, &query, json!({"id": "43"}));
    let refreshed = cache.fetch(&query, Method::Read, true).await.unwrap();
    assert_eq!(refreshed["id"], "43");
    let cached = cache.fetch(&query, Method::Read, false).await.unwrap();
    assert_eq!(cached["id"], "43", "refreshed value should replace the old one");
    assert_eq!(client.call_count(Method::Read, &query), 2);
}

#[rstest]
#[tokio::test]
async fn test_writes_are_never_cached() {
    init_logging();
    let client = Arc::new(FakeClient::new());
    let cache = cache_over(&client);
    let query = ResourceQuery::new(ME)
        .with_endpoint("feed")
        .with_parameter("message", "hi");
    client.respond(Method::Write, &query, json!({"id": "42_900"}));

    cache.fetch(&query, Method::Write, false).await.unwrap();
    cache.fetch(&query, Method::Write, false).await.unwrap();
    assert_eq!(client.call_count(Method::Write, &query), 2);
    assert!(!cache.contains(&query));
}

#[rstest]
#[tokio::test]
async fn test_errors_are_not_cached() {
    init_logging();
    let client = Arc::new(FakeClient::new());
    let cache = cache_over(&client);
    let query = status_listing(ME);
    client.respond(
        Method::Read,
        &query,
        RemoteError::new("OAuthException", 1, "try later"),
    );

    let err = cache.fetch(&query, Method::Read, false).await.unwrap_err();
    assert!(matches!(err, Error::Remote(_)), "got {err:?}");
    assert!(!cache.contains(&query));

    client.respond(Method::Read, &query, json!({"data": []}));
    cache.fetch(&query, Method::Read, false).await.unwrap();
    assert_eq!(client.call_count(Method::Read, &query), 2);
}

#[rstest]
#[tokio::test]
async fn test_failed_refresh_keeps_previous_value(fake_graph: FakeClient) {
    init_logging();
    let client = Arc::new(fake_graph);
    let cache = cache_over(&client);
    let query = user_id_query();

    cache.fetch(&query, Method::Read, false).await.unwrap();
    client.respond(Method::Read, &query, FakeResponse::Timeout);
    let err = cache.fetch(&query, Method::Read, true).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "got {err:?}");

    let cached = cache.fetch(&query, Method::Read, false).await.unwrap();
    assert_eq!(cached["id"], "42");
}

#[rstest]
#[tokio::test]
async fn test_mark_stale_refetches_once(fake_graph: FakeClient) {
    init_logging();
    let client = Arc::new(fake_graph);
    let cache = cache_over(&client);
    let query = status_listing(ME);

    cache.fetch(&query, Method::Read, false).await.unwrap();
    cache.mark_stale(&query);
    assert!(!cache.contains(&query));
    cache.fetch(&query, Method::Read, false).await.unwrap();
    cache.fetch(&query, Method::Read, false).await.unwrap();
    assert_eq!(client.call_count(Method::Read, &query), 2);
}

#[rstest]
#[tokio::test]
async fn test_clear_forgets_everything(fake_graph: FakeClient) {
    init_logging();
    let client = Arc::new(fake_graph);
    let cache = cache_over(&client);
    let query = status_listing(ME);

    cache.fetch(&query, Method::Read, false).await.unwrap();
    cache.clear();
    assert!(!cache.contains(&query));
    cache.fetch(&query, Method::Read, false).await.unwrap();
    assert_eq!(client.call_count(Method::Read, &query), 2);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fetches_share_one_request() {
    init_logging();
    let client = Arc::new(FakeClient::new().with_delay(Duration::from_millis(50)));
    let query = status_listing(ME);
    client.respond(Method::Read, &query, json!({"data": []}));
    let cache = Arc::new(cache_over(&client));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let query = query.clone();
            tokio::spawn(async move { cache.fetch(&query, Method::Read, false).await })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }
    assert_eq!(client.call_count(Method::Read, &query), 1);
}

#[rstest]
#[tokio::test]
async fn test_fql_results_are_cached() {
    init_logging();
    let client = Arc::new(FakeClient::new());
    let query = FqlQuery::friends_named("Carol");
    client.respond_fql(&query, json!({"data": [{"uid": 79}]}));
    let cache = cache_over(&client);

    cache.fetch_fql(&query, false).await.unwrap();
    cache.fetch_fql(&query, false).await.unwrap();
    assert_eq!(client.calls().len(), 1);
}
