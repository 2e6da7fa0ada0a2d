// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::Document;
use crate::query::ResourceQuery;

#[cfg(test)]
#[path = "./endpoint_test.rs"]
mod endpoint_test;

pub const STATUS: &str = "status";
pub const ALBUMS: &str = "albums";
pub const FRIENDS: &str = "friends";

/// The write-only file that creates new items in an endpoint
pub const POST_FILE_NAME: &str = "post";

/// How the items of an endpoint are named in its directory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryNames {
    /// Items are listed by their remote id
    Ids,
    /// Items are listed by their `name` field
    Names,
}

/// The conventions used to present one remote collection
/// as a directory.
#[derive(Debug)]
pub struct Endpoint {
    pub name: &'static str,
    /// The edge of the owning node that lists this collection
    edge: &'static str,
    listing_parameters: &'static [(&'static str, &'static str)],
    pub entry_names: EntryNames,
    /// Items without this field are not listed
    required_field: Option<&'static str>,
    item_parameters: &'static [(&'static str, &'static str)],
    /// The field served as the content of an item file, if
    /// this endpoint has item files at all
    display_field: Option<&'static str>,
    mtime_field: Option<&'static str>,
    /// True if the user's own items can be removed
    pub deletable: bool,
    /// The edge that new items are posted to, if any
    post_edge: Option<&'static str>,
}

// parameters are kept in alphabetical order so that equivalent
// queries always produce the same cache key
static ENDPOINTS: &[Endpoint] = &[
    Endpoint {
        name: STATUS,
        edge: "statuses",
        listing_parameters: &[("date_format", "U"), ("fields", "id,message,updated_time")],
        entry_names: EntryNames::Ids,
        required_field: Some("message"),
        item_parameters: &[("date_format", "U"), ("fields", "message,updated_time")],
        display_field: Some("message"),
        mtime_field: Some("updated_time"),
        deletable: true,
        post_edge: Some("feed"),
    },
    Endpoint {
        name: ALBUMS,
        edge: "albums",
        listing_parameters: &[("fields", "id,name")],
        entry_names: EntryNames::Names,
        required_field: Some("name"),
        item_parameters: &[
            ("date_format", "U"),
            ("fields", "description,name,updated_time"),
        ],
        display_field: Some("description"),
        mtime_field: Some("updated_time"),
        deletable: false,
        post_edge: None,
    },
    Endpoint {
        name: FRIENDS,
        edge: "friends",
        listing_parameters: &[("fields", "id,name")],
        entry_names: EntryNames::Names,
        required_field: Some("name"),
        item_parameters: &[],
        display_field: None,
        mtime_field: None,
        deletable: false,
        post_edge: None,
    },
];

/// Find the conventions for a named endpoint
pub fn lookup(name: &str) -> Option<&'static Endpoint> {
    ENDPOINTS.iter().find(|e| e.name == name)
}

impl Endpoint {
    /// True if the items of this endpoint are presented as files
    pub fn has_items(&self) -> bool {
        self.display_field.is_some()
    }

    pub fn is_postable(&self) -> bool {
        self.post_edge.is_some()
    }

    /// The query that lists this endpoint for the given node
    pub fn listing_query(&self, node: &str) -> ResourceQuery {
        self.listing_parameters.iter().fold(
            ResourceQuery::new(node).with_endpoint(self.edge),
            |q, (k, v)| q.with_parameter(*k, *v),
        )
    }

    /// The query that fetches a single item by id
    pub fn item_query(&self, id: &str) -> ResourceQuery {
        self.item_parameters
            .iter()
            .fold(ResourceQuery::new(id), |q, (k, v)| q.with_parameter(*k, *v))
    }

    /// The query that creates a new item owned by the given node
    pub fn post_query(&self, node: &str, message: &str) -> Option<ResourceQuery> {
        let edge = self.post_edge?;
        Some(
            ResourceQuery::new(node)
                .with_endpoint(edge)
                .with_parameter("message", message),
        )
    }

    /// The query that removes one of the user's items.
    ///
    /// The remote requires the owner's id to be prefixed onto the
    /// item id for this to succeed.
    pub fn delete_query(&self, user_id: &str, item: &str) -> ResourceQuery {
        ResourceQuery::new(format!("{user_id}_{item}"))
    }

    /// The directory entry names for a listing of this endpoint
    pub fn entry_names(&self, items: &[Value]) -> Vec<String> {
        let key = match self.entry_names {
            EntryNames::Ids => "id",
            EntryNames::Names => "name",
        };
        let mut names: Vec<String> = Vec::with_capacity(items.len());
        for item in items {
            if let Some(required) = self.required_field {
                if item.get(required).is_none() {
                    continue;
                }
            }
            let Some(name) = item.get(key).and_then(value_to_string) else {
                continue;
            };
            if name.is_empty() || name.contains('/') || names.contains(&name) {
                tracing::trace!(endpoint = self.name, %name, "skipping unusable entry name");
                continue;
            }
            names.push(name);
        }
        names
    }

    /// The remote id of a listed item, by its entry name.
    ///
    /// Only entries that would appear in the listing are found. Names
    /// are not guaranteed to be unique, the first match in listing
    /// order is used.
    pub fn find_item_id(&self, items: &[Value], entry: &str) -> Option<String> {
        if !self.entry_names(items).iter().any(|name| name == entry) {
            return None;
        }
        match self.entry_names {
            EntryNames::Ids => Some(entry.to_string()),
            EntryNames::Names => items
                .iter()
                .find(|item| item.get("name").and_then(Value::as_str) == Some(entry))
                .and_then(|item| item.get("id"))
                .and_then(value_to_string),
        }
    }

    /// The content of an item file
    pub fn display(&self, document: &Document) -> String {
        self.display_field
            .and_then(|field| document.get(field))
            .and_then(value_to_string)
            .unwrap_or_default()
    }

    /// The modification time reported for an item file
    pub fn mtime(&self, document: &Document) -> Option<SystemTime> {
        let value = document.get(self.mtime_field?)?;
        parse_timestamp(value)
    }
}

/// Remote ids are strings in the graph, but numbers in FQL
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a remote timestamp, either unix seconds (`date_format=U`)
/// or the graph's default ISO-8601 format.
pub fn parse_timestamp(value: &Value) -> Option<SystemTime> {
    let seconds = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => match s.parse::<i64>() {
            Ok(seconds) => seconds,
            Err(_) => chrono::DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z")
                .ok()?
                .timestamp(),
        },
        _ => return None,
    };
    let seconds = u64::try_from(seconds).ok()?;
    Some(UNIX_EPOCH + Duration::from_secs(seconds))
}
