use serde_json::Value;

use super::key::QueryKey;
use super::transport::Method;

/// A write plus the key families it makes stale.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub invalidates: Vec<QueryKey>,
    /// Detail key of the entity being written, invalidated on not-found.
    pub target: Option<QueryKey>,
}

impl Mutation {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            invalidates: Vec::new(),
            target: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn invalidates(mut self, key: QueryKey) -> Self {
        if !self.invalidates.contains(&key) {
            self.invalidates.push(key);
        }
        self
    }

    pub fn invalidates_all(self, keys: impl IntoIterator<Item = QueryKey>) -> Self {
        keys.into_iter().fold(self, Self::invalidates)
    }

    pub fn target(mut self, key: QueryKey) -> Self {
        self.target = Some(key);
        self
    }
}
