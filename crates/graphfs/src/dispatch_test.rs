// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use rstest::{fixture, rstest};
use serde_json::json;

use super::{AccessMode, Dispatcher, NodeKind, byte_range, failure_level};
use crate::auth::{Authenticator, StaticToken};
use crate::config::Config;
use crate::endpoint::{self, STATUS};
use crate::fixtures::*;
use crate::query::{ME, Method, ResourceQuery};
use crate::{Error, FsErrorKind, RemoteError};

struct Mounted {
    client: Arc<FakeClient>,
    fs: Dispatcher,
}

#[fixture]
fn mounted(fake_graph: FakeClient) -> Mounted {
    init_logging();
    let client = Arc::new(fake_graph);
    let fs = Dispatcher::new(
        &Config::default(),
        Arc::new(StaticToken::new("token")),
        client.clone(),
    );
    Mounted { client, fs }
}

fn names(entries: Vec<super::DirEntry>) -> Vec<String> {
    entries.into_iter().map(|e| e.name).collect()
}

fn post_query(node: &str, message: &str) -> ResourceQuery {
    endpoint::lookup(STATUS)
        .unwrap()
        .post_query(node, message)
        .unwrap()
}

#[rstest]
#[tokio::test]
async fn test_root_lists_visible_endpoints(mounted: Mounted) {
    let entries = mounted.fs.readdir("/").await.unwrap();
    assert_eq!(names(entries), vec![".", "..", "albums", "friends", "status"]);

    let attr = mounted.fs.getattr("/").await.unwrap();
    assert_eq!(attr.kind, NodeKind::Directory);
    assert_eq!(attr.perm, 0o755);
    assert_eq!(attr.mtime, mounted.fs.mount_time());
}

#[rstest]
#[tokio::test]
async fn test_root_without_grants_is_empty() {
    init_logging();
    let client = Arc::new(FakeClient::new());
    client.respond(
        Method::Read,
        &permissions_query(),
        json!({"data": [{"permission": "user_photos", "status": "granted"}]}),
    );
    let fs = Dispatcher::new(
        &Config::default(),
        Arc::new(StaticToken::new("token")),
        client,
    );
    assert_eq!(names(fs.readdir("/").await.unwrap()), vec![".", ".."]);
    assert_eq!(fs.getattr("/status").await, Err(FsErrorKind::NotFound));
}

#[rstest]
#[tokio::test]
async fn test_unreadable_permissions_are_unavailable() {
    init_logging();
    let client = Arc::new(FakeClient::new());
    client.respond(Method::Read, &permissions_query(), json!({"id": "42"}));
    let fs = Dispatcher::new(
        &Config::default(),
        Arc::new(StaticToken::new("token")),
        client,
    );
    assert_eq!(fs.readdir("/").await, Err(FsErrorKind::ResourceUnavailable));
}

#[rstest]
#[tokio::test]
async fn test_status_directory(mounted: Mounted) {
    let entries = mounted.fs.readdir("/status").await.unwrap();
    assert_eq!(names(entries.clone()), vec![".", "..", "101", "102", "post"]);
    assert!(entries[2..].iter().all(|e| e.kind == NodeKind::File));
}

#[rstest]
#[tokio::test]
async fn test_status_file(mounted: Mounted) {
    let attr = mounted.fs.getattr("/status/101").await.unwrap();
    assert_eq!(attr.kind, NodeKind::File);
    assert_eq!(attr.perm, 0o400);
    assert_eq!(attr.size, "Hello, world".len() as u64);
    assert_eq!(attr.mtime, UNIX_EPOCH + Duration::from_secs(1400000000));

    mounted
        .fs
        .open("/status/101", AccessMode::ReadOnly)
        .await
        .unwrap();
    let content = mounted.fs.read("/status/101", 0, 4096).await.unwrap();
    assert_eq!(content, b"Hello, world");
    let content = mounted.fs.read("/status/101", 7, 3).await.unwrap();
    assert_eq!(content, b"wor");
}

#[rstest]
#[case::at_end(12, 10, b"" as &[u8])]
#[case::past_end(100, 10, b"")]
#[case::last_byte(11, 10, b"d")]
#[case::exact(0, 12, b"Hello, world")]
#[case::empty_read(3, 0, b"")]
#[tokio::test]
async fn test_read_boundaries(
    mounted: Mounted,
    #[case] offset: u64,
    #[case] size: usize,
    #[case] expected: &[u8],
) {
    let content = mounted.fs.read("/status/101", offset, size).await.unwrap();
    assert_eq!(content, expected);
}

#[rstest]
#[case::remote(
    Error::Remote(RemoteError::new("OAuthException", 10, "denied")),
    tracing::Level::DEBUG
)]
#[case::not_found(Error::UnknownFriend("Nobody".into()), tracing::Level::DEBUG)]
#[case::timeout(Error::Timeout("me/statuses".into()), tracing::Level::WARN)]
#[case::unexpected(Error::UnexpectedResponse("me".into()), tracing::Level::WARN)]
fn test_failure_level(#[case] err: Error, #[case] expected: tracing::Level) {
    let kind = err.fs_error_kind();
    assert_eq!(failure_level(&err, kind), expected);
}

#[rstest]
fn test_byte_range() {
    assert_eq!(byte_range(b"abc", u64::MAX, 1), b"");
    assert_eq!(byte_range(b"abc", 1, usize::MAX), b"bc");
}

#[rstest]
#[case::write_resource("/status/101", AccessMode::WriteOnly, FsErrorKind::PermissionDenied)]
#[case::rw_resource("/status/101", AccessMode::ReadWrite, FsErrorKind::PermissionDenied)]
#[case::read_post("/status/post", AccessMode::ReadOnly, FsErrorKind::PermissionDenied)]
#[case::directory("/status", AccessMode::ReadOnly, FsErrorKind::IsDirectory)]
#[case::unknown("/photos/1", AccessMode::ReadOnly, FsErrorKind::NotFound)]
#[tokio::test]
async fn test_open_refusals(
    mounted: Mounted,
    #[case] path: &str,
    #[case] mode: AccessMode,
    #[case] expected: FsErrorKind,
) {
    assert_eq!(mounted.fs.open(path, mode).await, Err(expected));
}

#[rstest]
#[case::read_only(libc::O_RDONLY, AccessMode::ReadOnly)]
#[case::write_only(libc::O_WRONLY | libc::O_TRUNC, AccessMode::WriteOnly)]
#[case::read_write(libc::O_RDWR | libc::O_APPEND, AccessMode::ReadWrite)]
fn test_access_mode_from_flags(#[case] flags: i32, #[case] expected: AccessMode) {
    assert_eq!(AccessMode::from_flags(flags), expected);
}

#[rstest]
#[tokio::test]
async fn test_missing_item_is_not_found(mounted: Mounted) {
    assert_eq!(
        mounted.fs.getattr("/status/999").await,
        Err(FsErrorKind::NotFound)
    );
    assert_eq!(
        mounted.fs.getattr("/albums/Nope").await,
        Err(FsErrorKind::NotFound)
    );
}

#[rstest]
#[tokio::test]
async fn test_album_is_resolved_by_name(mounted: Mounted) {
    let album = endpoint::lookup(endpoint::ALBUMS)
        .unwrap()
        .item_query("501");
    mounted.client.respond(
        Method::Read,
        &album,
        json!({"name": "Trips", "description": "Summer", "updated_time": "2014-05-13T16:53:20+0000"}),
    );
    assert_eq!(
        names(mounted.fs.readdir("/albums").await.unwrap()),
        vec![".", "..", "Trips"]
    );
    assert_eq!(mounted.fs.read("/albums/Trips", 0, 100).await.unwrap(), b"Summer");
    let attr = mounted.fs.getattr("/albums/Trips").await.unwrap();
    assert_eq!(attr.mtime, UNIX_EPOCH + Duration::from_secs(1400000000));
}

#[rstest]
#[tokio::test]
async fn test_friends(mounted: Mounted) {
    assert_eq!(
        names(mounted.fs.readdir("/friends").await.unwrap()),
        vec![".", "..", "Bob Jones", "Carol"]
    );
    assert_eq!(
        names(mounted.fs.readdir("/friends/Bob Jones").await.unwrap()),
        vec![".", "..", "albums", "status"]
    );
    assert_eq!(
        names(mounted.fs.readdir("/friends/Bob Jones/status").await.unwrap()),
        vec![".", "..", "701", "post"]
    );
    assert_eq!(
        mounted.fs.getattr("/friends/Nobody").await,
        Err(FsErrorKind::NotFound)
    );
    assert_eq!(
        mounted.fs.readdir("/friends/Nobody/status").await,
        Err(FsErrorKind::NotFound)
    );
}

#[rstest]
#[tokio::test]
async fn test_friend_items_are_scoped_to_the_friend(mounted: Mounted) {
    let item = endpoint::lookup(STATUS).unwrap().item_query("701");
    mounted.client.respond(
        Method::Read,
        &item,
        json!({"id": "701", "message": "Bob was here", "updated_time": 1400000300}),
    );
    assert_eq!(
        mounted
            .fs
            .read("/friends/Bob Jones/status/701", 0, 100)
            .await
            .unwrap(),
        b"Bob was here"
    );

    assert_eq!(
        mounted.fs.read("/friends/Bob Jones/status/101", 0, 100).await,
        Err(FsErrorKind::NotFound),
        "the user's own status is not one of Bob's"
    );
    assert_eq!(
        mounted.fs.getattr("/status/701").await,
        Err(FsErrorKind::NotFound),
        "Bob's status is not one of the user's"
    );
    assert_eq!(mounted.client.call_count(Method::Read, &item), 1);
}

#[rstest]
#[tokio::test]
async fn test_items_of_unknown_friend_are_not_found(mounted: Mounted) {
    assert_eq!(
        mounted.fs.getattr("/friends/Nobody").await,
        Err(FsErrorKind::NotFound)
    );
    assert_eq!(
        mounted.fs.getattr("/friends/Nobody/status/101").await,
        Err(FsErrorKind::NotFound)
    );
    assert_eq!(
        mounted.fs.read("/friends/Nobody/status/101", 0, 100).await,
        Err(FsErrorKind::NotFound)
    );
}

#[rstest]
#[tokio::test]
async fn test_refresh_listings(fake_graph: FakeClient) {
    init_logging();
    let client = Arc::new(fake_graph);
    let mut config = Config::default();
    config.filesystem.refresh_listings = true;
    let fs = Dispatcher::new(&config, Arc::new(StaticToken::new("token")), client.clone());

    fs.readdir("/status").await.unwrap();
    fs.readdir("/status").await.unwrap();
    assert_eq!(client.call_count(Method::Read, &status_listing(ME)), 2);

    fs.read("/status/101", 0, 100).await.unwrap();
    fs.read("/status/101", 0, 100).await.unwrap();
    let item = endpoint::lookup(STATUS).unwrap().item_query("101");
    assert_eq!(client.call_count(Method::Read, &item), 2);
}

#[rstest]
#[tokio::test]
async fn test_friend_listing_refused(mounted: Mounted) {
    mounted.client.respond(
        Method::Read,
        &status_listing("79"),
        RemoteError::new("OAuthException", 10, "requires friends_status"),
    );
    assert_eq!(
        mounted.fs.readdir("/friends/Carol/status").await,
        Err(FsErrorKind::PermissionDenied)
    );
}

#[rstest]
#[tokio::test]
async fn test_timeout_is_reported(mounted: Mounted) {
    mounted
        .client
        .respond(Method::Read, &status_listing(ME), FakeResponse::Timeout);
    assert_eq!(
        mounted.fs.readdir("/status").await,
        Err(FsErrorKind::TimedOut)
    );
}

#[rstest]
#[tokio::test]
async fn test_post_then_list(mounted: Mounted) {
    let listing = status_listing(ME);
    assert_eq!(
        names(mounted.fs.readdir("/status").await.unwrap()),
        vec![".", "..", "101", "102", "post"]
    );

    // without a local change, the cached listing is served as-is
    mounted.client.respond(
        Method::Read,
        &listing,
        json!({"data": [
            {"id": "104", "message": "New!"},
            {"id": "101", "message": "Hello, world"},
            {"id": "102", "message": "Second post"},
        ]}),
    );
    assert_eq!(
        names(mounted.fs.readdir("/status").await.unwrap()),
        vec![".", "..", "101", "102", "post"]
    );

    mounted
        .client
        .respond(Method::Write, &post_query(ME, "New!"), json!({"id": "42_104"}));
    let attr = mounted.fs.getattr("/status/post").await.unwrap();
    assert_eq!((attr.perm, attr.size), (0o200, 0));
    mounted.fs.truncate("/status/post", 0).await.unwrap();
    let written = mounted.fs.write("/status/post", 0, b"New!\n").await.unwrap();
    assert_eq!(written, 5);
    assert_eq!(
        mounted.client.call_count(Method::Write, &post_query(ME, "New!")),
        1
    );

    assert_eq!(
        names(mounted.fs.readdir("/status").await.unwrap()),
        vec![".", "..", "104", "101", "102", "post"]
    );
    assert_eq!(mounted.client.call_count(Method::Read, &listing), 2);
}

#[rstest]
#[tokio::test]
async fn test_empty_post_is_ignored(mounted: Mounted) {
    let written = mounted.fs.write("/status/post", 0, b"\n").await.unwrap();
    assert_eq!(written, 1);
    assert!(
        mounted
            .client
            .calls()
            .iter()
            .all(|(method, _)| *method != Method::Write)
    );
}

#[rstest]
#[tokio::test]
async fn test_post_to_friend(mounted: Mounted) {
    mounted.client.respond(
        Method::Write,
        &post_query("77", "hi bob"),
        RemoteError::new("OAuthException", 200, "not allowed"),
    );
    assert_eq!(
        mounted.fs.write("/friends/Bob Jones/status/post", 0, b"hi bob").await,
        Err(FsErrorKind::PermissionDenied)
    );
}

#[rstest]
#[case::resource("/status/101", FsErrorKind::PermissionDenied)]
#[case::directory("/status", FsErrorKind::IsDirectory)]
#[case::unknown("/photos/1", FsErrorKind::PermissionDenied)]
#[tokio::test]
async fn test_write_refusals(
    mounted: Mounted,
    #[case] path: &str,
    #[case] expected: FsErrorKind,
) {
    assert_eq!(mounted.fs.write(path, 0, b"x").await, Err(expected));
}

#[rstest]
#[tokio::test]
async fn test_unlink_status(mounted: Mounted) {
    let delete = ResourceQuery::new("42_101");
    mounted.client.respond(Method::Delete, &delete, json!(true));
    mounted.fs.readdir("/status").await.unwrap();

    mounted.fs.unlink("/status/101").await.unwrap();
    assert_eq!(mounted.client.call_count(Method::Delete, &delete), 1);

    mounted.fs.readdir("/status").await.unwrap();
    assert_eq!(
        mounted.client.call_count(Method::Read, &status_listing(ME)),
        2,
        "listing should be refreshed after a removal"
    );
}

#[rstest]
#[case::refused(json!(false), FsErrorKind::OperationNotPermitted)]
#[case::missing(json!({"success": false}), FsErrorKind::OperationNotPermitted)]
#[tokio::test]
async fn test_unlink_not_removed(
    mounted: Mounted,
    #[case] response: serde_json::Value,
    #[case] expected: FsErrorKind,
) {
    mounted
        .client
        .respond(Method::Delete, &ResourceQuery::new("42_101"), response);
    assert_eq!(mounted.fs.unlink("/status/101").await, Err(expected));
}

#[rstest]
#[case::friend_item("/friends/Bob Jones/status/701", FsErrorKind::PermissionDenied)]
#[case::not_mine("/status/701", FsErrorKind::NotFound)]
#[case::album("/albums/Trips", FsErrorKind::PermissionDenied)]
#[case::post("/status/post", FsErrorKind::PermissionDenied)]
#[case::directory("/status", FsErrorKind::IsDirectory)]
#[case::unknown("/photos/1", FsErrorKind::PermissionDenied)]
#[tokio::test]
async fn test_unlink_refusals(
    mounted: Mounted,
    #[case] path: &str,
    #[case] expected: FsErrorKind,
) {
    assert_eq!(mounted.fs.unlink(path).await, Err(expected));
    assert!(
        mounted
            .client
            .calls()
            .iter()
            .all(|(method, _)| *method != Method::Delete)
    );
}

#[rstest]
#[case::resource("/status/101", Err(FsErrorKind::PermissionDenied))]
#[case::directory("/friends", Err(FsErrorKind::IsDirectory))]
#[case::unknown("/nothing/here", Err(FsErrorKind::NotFound))]
#[tokio::test]
async fn test_truncate(
    mounted: Mounted,
    #[case] path: &str,
    #[case] expected: Result<(), FsErrorKind>,
) {
    assert_eq!(mounted.fs.truncate(path, 0).await, expected);
}

#[rstest]
#[tokio::test]
async fn test_non_directories(mounted: Mounted) {
    assert_eq!(
        mounted.fs.readdir("/status/101").await,
        Err(FsErrorKind::NotDirectory)
    );
    assert_eq!(
        mounted.fs.readdir("/photos").await,
        Err(FsErrorKind::NotFound)
    );
    assert_eq!(
        mounted.fs.read("/friends", 0, 10).await,
        Err(FsErrorKind::IsDirectory)
    );
}

#[rstest]
#[tokio::test]
async fn test_init_retries_login(fake_graph: FakeClient) {
    init_logging();
    let auth = Arc::new(FakeLogin::failing(2));
    let fs = Dispatcher::init(&Config::default(), auth.clone(), Arc::new(fake_graph))
        .await
        .unwrap();
    assert_eq!(auth.attempts(), 3);
    assert!(auth.is_logged_in());

    fs.destroy();
    assert!(!auth.is_logged_in());
}

#[rstest]
#[tokio::test]
async fn test_init_gives_up(fake_graph: FakeClient) {
    init_logging();
    let auth = Arc::new(FakeLogin::failing(10));
    let result = Dispatcher::init(&Config::default(), auth.clone(), Arc::new(fake_graph)).await;
    assert!(matches!(result, Err(Error::LoginFailed)));
    assert_eq!(auth.attempts(), 3);
}
