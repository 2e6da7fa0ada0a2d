// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::fmt::Write;

#[cfg(test)]
#[path = "./query_test.rs"]
mod query_test;

/// The node used to address the authenticated user.
pub const ME: &str = "me";

/// The kind of request made to the remote graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum Method {
    Read,
    Write,
    Delete,
}

/// A normalized description of a single remote fetch.
///
/// Queries compare and hash over every field, including the order
/// of their parameters, and are used as keys in the query cache.
/// Two queries with the same parameters in a different order are
/// considered distinct, so parameters should always be added in
/// a deterministic (alphabetical) order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ResourceQuery {
    node: String,
    endpoint: String,
    edge: String,
    parameters: Vec<(String, String)>,
}

impl ResourceQuery {
    /// A query for a single node of the graph
    pub fn new<N: Into<String>>(node: N) -> Self {
        Self {
            node: node.into(),
            ..Default::default()
        }
    }

    /// Address an endpoint (collection) of this node
    pub fn with_endpoint<E: Into<String>>(mut self, endpoint: E) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Address a sub-collection of this node's endpoint
    pub fn with_edge<E: Into<String>>(mut self, edge: E) -> Self {
        self.edge = edge.into();
        self
    }

    /// Append a parameter to this query
    pub fn with_parameter<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.parameters.push((key.into(), value.into()));
        self
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn edge(&self) -> &str {
        &self.edge
    }

    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    /// The relative location of this query in the graph, eg: `me/statuses`
    pub fn path(&self) -> String {
        [self.node.as_str(), self.endpoint.as_str(), self.edge.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl std::fmt::Display for ResourceQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())?;
        let mut sep = '?';
        for (key, value) in self.parameters.iter() {
            f.write_char(sep)?;
            write!(f, "{key}={value}")?;
            sep = '&';
        }
        Ok(())
    }
}

/// A query written in the graph's FQL language.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FqlQuery {
    text: String,
}

impl FqlQuery {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The query that lists the friends of the current user
    /// who have the given name.
    pub fn friends_named(name: &str) -> Self {
        // FQL string literals are single-quoted with backslash escapes
        let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
        Self::new(format!(
            "SELECT uid, name FROM user WHERE name = '{escaped}' AND uid IN \
             (SELECT uid2 FROM friend WHERE uid1 = me())"
        ))
    }
}

impl std::fmt::Display for FqlQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}
