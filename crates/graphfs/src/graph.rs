// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::sync::Arc;

use serde_json::Value;

use crate::cache::QueryCache;
use crate::config::{self, FriendLookup};
use crate::endpoint::{self, value_to_string};
use crate::query::{FqlQuery, ME, Method, ResourceQuery};
use crate::remote::GraphClient;
use crate::resolve::Owner;
use crate::{Document, Error, Result};

#[cfg(test)]
#[path = "./graph_test.rs"]
mod graph_test;

/// A view of the remote graph for the authenticated user,
/// backed by a [`QueryCache`].
pub struct Graph {
    cache: QueryCache,
    max_pages: usize,
    friend_lookup: FriendLookup,
    user_id: tokio::sync::OnceCell<String>,
}

impl Graph {
    pub fn new(client: Arc<dyn GraphClient>, api: &config::Api, friend_lookup: FriendLookup) -> Self {
        Self {
            cache: QueryCache::new(client),
            max_pages: api.max_pages.max(1),
            friend_lookup,
            user_id: Default::default(),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Read a single document
    pub async fn get(&self, query: &ResourceQuery, force_refresh: bool) -> Result<Arc<Document>> {
        self.cache.fetch(query, Method::Read, force_refresh).await
    }

    pub async fn post(&self, query: &ResourceQuery) -> Result<Arc<Document>> {
        self.cache.fetch(query, Method::Write, false).await
    }

    pub async fn delete(&self, query: &ResourceQuery) -> Result<Arc<Document>> {
        self.cache.fetch(query, Method::Delete, false).await
    }

    /// Read every item of a paginated collection.
    ///
    /// At most the configured number of pages are followed. When the
    /// first page is refreshed, the following pages are refreshed too
    /// since their cursors may no longer line up.
    pub async fn collection(&self, query: &ResourceQuery, force_refresh: bool) -> Result<Vec<Value>> {
        let refresh_pages = force_refresh || !self.cache.contains(query);
        let mut items = Vec::new();
        let mut page = query.clone();
        for number in 0..self.max_pages {
            let document = self.get(&page, force_refresh || (number > 0 && refresh_pages)).await?;
            let Some(data) = document.get("data").and_then(Value::as_array) else {
                return Err(Error::UnexpectedResponse(format!(
                    "{page} did not return a collection"
                )));
            };
            items.extend(data.iter().cloned());
            let Some(after) = next_cursor(&document) else {
                break;
            };
            page = query.clone().with_parameter("after", after);
        }
        Ok(items)
    }

    /// The remote id of the authenticated user
    pub async fn user_id(&self) -> Result<String> {
        self.user_id
            .get_or_try_init(|| async {
                let query = ResourceQuery::new(ME).with_parameter("fields", "id");
                let document = self.get(&query, false).await?;
                document
                    .get("id")
                    .and_then(value_to_string)
                    .ok_or_else(|| Error::UnexpectedResponse(format!("{query} has no id")))
            })
            .await
            .cloned()
    }

    /// The friends of the authenticated user
    pub async fn friends(&self) -> Result<Vec<Value>> {
        let Some(friends) = endpoint::lookup(endpoint::FRIENDS) else {
            return Err(Error::String("friends endpoint is not defined".into()));
        };
        self.collection(&friends.listing_query(ME), false).await
    }

    /// Find the remote id of the friend with the given display name.
    ///
    /// When more than one friend has the same name, the first one
    /// returned by the remote is used.
    pub async fn uid_from_name(&self, name: &str) -> Result<String> {
        let found = match self.friend_lookup {
            FriendLookup::Listing => self
                .friends()
                .await?
                .iter()
                .find(|friend| friend.get("name").and_then(Value::as_str) == Some(name))
                .and_then(|friend| friend.get("id"))
                .and_then(value_to_string),
            FriendLookup::Fql => {
                let document = self
                    .cache
                    .fetch_fql(&FqlQuery::friends_named(name), false)
                    .await?;
                document
                    .get("data")
                    .and_then(Value::as_array)
                    .and_then(|rows| rows.first())
                    .and_then(|row| row.get("uid"))
                    .and_then(value_to_string)
            }
        };
        found.ok_or_else(|| Error::UnknownFriend(name.to_string()))
    }

    /// The graph node that holds the data of the given owner
    pub async fn node_for(&self, owner: &Owner) -> Result<String> {
        match owner {
            Owner::Me => Ok(ME.to_string()),
            Owner::Friend(name) => self.uid_from_name(name).await,
        }
    }

    pub fn mark_stale(&self, query: &ResourceQuery) {
        self.cache.mark_stale(query)
    }

    /// Forget everything that was fetched
    pub fn clear(&self) {
        self.cache.clear()
    }
}

fn next_cursor(document: &Document) -> Option<String> {
    let paging = document.get("paging")?;
    // the remote omits "next" on the last page, even though
    // the cursors are still present
    paging.get("next")?;
    paging
        .get("cursors")?
        .get("after")?
        .as_str()
        .map(String::from)
}
