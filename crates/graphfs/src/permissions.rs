// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use crate::graph::Graph;
use crate::query::{ME, ResourceQuery};
use crate::{Document, Error, Result};

#[cfg(test)]
#[path = "./permissions_test.rs"]
mod permissions_test;

/// The endpoint that a granted permission makes visible.
///
/// Permissions are requested for both the user and their friends,
/// (eg: `user_status` and `friends_status`), either of which
/// reveals the same endpoint.
pub fn endpoint_for_permission(permission: &str) -> &str {
    permission
        .strip_prefix("user_")
        .or_else(|| permission.strip_prefix("friends_"))
        .unwrap_or(permission)
}

/// The endpoints revealed by a permissions document, or `None`
/// if the document is not a permission collection.
///
/// Both the record-per-permission form and the older single record
/// of permission flags are understood. Permissions that are not
/// granted, or whose flag is falsy, are excluded.
pub fn granted_endpoints(document: &Document) -> Option<BTreeSet<String>> {
    let records = document.get("data")?.as_array()?;
    let mut endpoints = BTreeSet::new();
    for record in records {
        let record = record.as_object()?;
        let named = record.get("permission").and_then(Value::as_str);
        let status = record.get("status").and_then(Value::as_str);
        if let (Some(permission), Some(status)) = (named, status) {
            if status == "granted" {
                endpoints.insert(endpoint_for_permission(permission).to_string());
            }
            continue;
        }
        for (permission, flag) in record {
            if is_truthy(flag) {
                endpoints.insert(endpoint_for_permission(permission).to_string());
            }
        }
    }
    Some(endpoints)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Tracks which endpoints the user has been granted access to.
///
/// The permission set is fetched once, on first use, and is then
/// fixed for the life of the mount.
pub struct PermissionCatalog {
    served: BTreeSet<String>,
    visible: tokio::sync::OnceCell<Arc<BTreeSet<String>>>,
}

impl PermissionCatalog {
    /// A catalog that only ever reveals the given endpoints
    pub fn new<I, S>(served: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            served: served.into_iter().map(Into::into).collect(),
            visible: Default::default(),
        }
    }

    pub fn permissions_query() -> ResourceQuery {
        ResourceQuery::new(ME).with_endpoint("permissions")
    }

    /// The endpoints that are both granted and served
    pub async fn visible_endpoints(&self, graph: &Graph) -> Result<Arc<BTreeSet<String>>> {
        self.visible
            .get_or_try_init(|| self.load(graph))
            .await
            .map(Arc::clone)
    }

    async fn load(&self, graph: &Graph) -> Result<Arc<BTreeSet<String>>> {
        let query = Self::permissions_query();
        let document = graph.get(&query, false).await?;
        let Some(granted) = granted_endpoints(&document) else {
            // the next attempt must not reuse this response
            graph.mark_stale(&query);
            return Err(Error::UnexpectedResponse(format!(
                "{query} did not return a permission collection"
            )));
        };
        let visible: BTreeSet<String> = granted.intersection(&self.served).cloned().collect();
        tracing::debug!(?visible, "loaded permissions");
        Ok(Arc::new(visible))
    }
}
