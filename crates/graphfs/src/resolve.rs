// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::BTreeSet;

use crate::endpoint::{self, FRIENDS, POST_FILE_NAME};

#[cfg(test)]
#[path = "./resolve_test.rs"]
mod resolve_test;

/// Whose data a path refers to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Owner {
    /// The authenticated user
    Me,
    /// A friend of the user, by their display name
    Friend(String),
}

/// What a filesystem path refers to in the remote graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathClassification {
    /// `/`
    Root,
    /// `/<endpoint>`
    EndpointDir { endpoint: String },
    /// `/friends`
    FriendDir,
    /// `/friends/<friend>`
    NamedFriendDir { friend: String },
    /// `/friends/<friend>/<endpoint>`
    EndpointUnderFriend { friend: String, endpoint: String },
    /// `[/friends/<friend>]/<endpoint>/<item>`
    ResourceFile {
        owner: Owner,
        endpoint: String,
        item: String,
    },
    /// `[/friends/<friend>]/<endpoint>/post`
    PostFile { owner: Owner, endpoint: String },
    Unknown,
}

impl PathClassification {
    pub fn is_dir(&self) -> bool {
        matches!(
            self,
            Self::Root
                | Self::EndpointDir { .. }
                | Self::FriendDir
                | Self::NamedFriendDir { .. }
                | Self::EndpointUnderFriend { .. }
        )
    }
}

/// Split a path into its normalized components.
///
/// Empty and `.` components are dropped, and `..` removes the
/// previous component, never rising above the root.
pub fn segments(path: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    parts
}

/// Classify a path, given the endpoints that are currently visible.
///
/// This is a pure function of its inputs, and performs no remote
/// lookups: a named friend is not checked for existence here.
pub fn classify(path: &str, visible: &BTreeSet<String>) -> PathClassification {
    use PathClassification::*;

    let parts = segments(path);
    let friends_visible = visible.contains(FRIENDS);
    match parts.as_slice() {
        [] => Root,
        [FRIENDS] if friends_visible => FriendDir,
        [endpoint] if visible.contains(*endpoint) => EndpointDir {
            endpoint: endpoint.to_string(),
        },
        [FRIENDS, friend] if friends_visible => NamedFriendDir {
            friend: friend.to_string(),
        },
        [endpoint, item] => classify_item(Owner::Me, endpoint, item, visible),
        [FRIENDS, friend, endpoint] if friends_visible && is_friend_endpoint(endpoint, visible) => {
            EndpointUnderFriend {
                friend: friend.to_string(),
                endpoint: endpoint.to_string(),
            }
        }
        [FRIENDS, friend, endpoint, item] if friends_visible => {
            if !is_friend_endpoint(endpoint, visible) {
                return Unknown;
            }
            classify_item(Owner::Friend(friend.to_string()), endpoint, item, visible)
        }
        _ => Unknown,
    }
}

// the friends of a friend are not served
fn is_friend_endpoint(endpoint: &str, visible: &BTreeSet<String>) -> bool {
    endpoint != FRIENDS && visible.contains(endpoint)
}

fn classify_item(
    owner: Owner,
    name: &str,
    item: &str,
    visible: &BTreeSet<String>,
) -> PathClassification {
    if !visible.contains(name) {
        return PathClassification::Unknown;
    }
    let Some(endpoint) = endpoint::lookup(name) else {
        return PathClassification::Unknown;
    };
    if item == POST_FILE_NAME && endpoint.is_postable() {
        return PathClassification::PostFile {
            owner,
            endpoint: name.to_string(),
        };
    }
    if !endpoint.has_items() {
        return PathClassification::Unknown;
    }
    PathClassification::ResourceFile {
        owner,
        endpoint: name.to_string(),
        item: item.to_string(),
    }
}
