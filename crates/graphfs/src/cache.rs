// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::query::{FqlQuery, Method, ResourceQuery};
use crate::remote::GraphClient;
use crate::{Document, Result};

#[cfg(test)]
#[path = "./cache_test.rs"]
mod cache_test;

/// A single cached document, and the lock that serializes
/// fetches for its key.
#[derive(Default)]
struct Slot {
    /// Set when the next read must go to the remote
    stale: AtomicBool,
    // held across the remote call so that only one fetch
    // per key is ever in flight
    document: tokio::sync::Mutex<Option<Arc<Document>>>,
}

/// Memoizes the results of remote queries.
///
/// Entries live until they are refreshed, marked stale or the
/// cache is cleared; there is no expiry.
pub struct QueryCache {
    client: Arc<dyn GraphClient>,
    documents: DashMap<ResourceQuery, Arc<Slot>>,
    fql_documents: DashMap<FqlQuery, Arc<Slot>>,
}

impl QueryCache {
    pub fn new(client: Arc<dyn GraphClient>) -> Self {
        Self {
            client,
            documents: Default::default(),
            fql_documents: Default::default(),
        }
    }

    /// Perform a query, reusing a previous result where possible.
    ///
    /// Only successful reads are cached. Writes and deletes always
    /// reach the remote, and errors are returned as-is without
    /// touching the cached value.
    pub async fn fetch(
        &self,
        query: &ResourceQuery,
        method: Method,
        force_refresh: bool,
    ) -> Result<Arc<Document>> {
        if method != Method::Read {
            tracing::debug!(%method, %query, "uncached request");
            return self.client.call(query, method).await.map(Arc::new);
        }
        let slot = slot_for(&self.documents, query);
        load(&slot, force_refresh, || self.client.call(query, method), query).await
    }

    /// Run an FQL statement, reusing a previous result where possible.
    pub async fn fetch_fql(&self, query: &FqlQuery, force_refresh: bool) -> Result<Arc<Document>> {
        let slot = slot_for(&self.fql_documents, query);
        load(&slot, force_refresh, || self.client.fql(query), query).await
    }

    /// Request that the next read of this query goes to the remote
    pub fn mark_stale(&self, query: &ResourceQuery) {
        tracing::debug!(%query, "marked stale");
        slot_for(&self.documents, query)
            .stale
            .store(true, Ordering::SeqCst);
    }

    /// True if a current result for this query is held
    pub fn contains(&self, query: &ResourceQuery) -> bool {
        let Some(slot) = self.documents.get(query) else {
            return false;
        };
        !slot.stale.load(Ordering::SeqCst)
            && slot
                .document
                .try_lock()
                .map(|d| d.is_some())
                .unwrap_or(false)
    }

    /// Drop every cached document
    pub fn clear(&self) {
        self.documents.clear();
        self.fql_documents.clear();
    }
}

fn slot_for<K>(map: &DashMap<K, Arc<Slot>>, key: &K) -> Arc<Slot>
where
    K: Hash + Eq + Clone,
{
    // the map guard must not be held across an await point
    if let Some(slot) = map.get(key) {
        return Arc::clone(slot.value());
    }
    Arc::clone(map.entry(key.clone()).or_default().value())
}

async fn load<F, Fut, K>(
    slot: &Slot,
    force_refresh: bool,
    fetch: F,
    key: &K,
) -> Result<Arc<Document>>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<Document>>,
    K: std::fmt::Display,
{
    let mut document = slot.document.lock().await;
    let stale = slot.stale.swap(false, Ordering::SeqCst);
    if !force_refresh && !stale {
        if let Some(existing) = document.as_ref() {
            tracing::trace!(%key, "cache hit");
            return Ok(Arc::clone(existing));
        }
    }

    tracing::debug!(%key, force_refresh, stale, "cache miss");
    match fetch().await {
        Ok(fetched) => {
            let fetched = Arc::new(fetched);
            document.replace(Arc::clone(&fetched));
            Ok(fetched)
        }
        Err(err) => {
            if stale {
                // keep asking for a refresh until one succeeds
                slot.stale.store(true, Ordering::SeqCst);
            }
            Err(err)
        }
    }
}
