//! Storage traits: the abstract interfaces for actor state and the index.
//!
//! [`KvStore`] is the durable state behind every actor, partitioned by scope.
//! [`IndexStore`] is the eventually-consistent key/value index that actors
//! project into and readers query, with optional JSON metadata per entry.
//! Implementations include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;

use crate::error::Result;

/// Range selection for [`KvStore::list`].
///
/// Keys are compared bytewise. `start` is inclusive, `end` exclusive. The
/// limit applies after ordering, so `reverse` with `limit` yields the last
/// entries of the range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<usize>,
    pub reverse: bool,
}

impl ListOptions {
    /// Every key starting with `prefix`.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn start(mut self, start: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self
    }

    pub fn end(mut self, end: impl Into<String>) -> Self {
        self.end = Some(end.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Whether `key` falls inside the selection (ignoring the limit).
    pub fn matches(&self, key: &str) -> bool {
        if let Some(prefix) = &self.prefix {
            if !key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(start) = &self.start {
            if key < start.as_str() {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if key >= end.as_str() {
                return false;
            }
        }
        true
    }
}

/// Durable keyed state, partitioned by scope.
///
/// Each actor owns one scope (e.g. `domain:0x…`) and is its only writer.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a value.
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace a value.
    async fn put(&self, scope: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a value. Returns whether it existed.
    async fn delete(&self, scope: &str, key: &str) -> Result<bool>;

    /// List `(key, value)` pairs in key order.
    async fn list(&self, scope: &str, options: &ListOptions) -> Result<Vec<(String, Vec<u8>)>>;
}

/// One index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub metadata: Option<serde_json::Value>,
}

/// The shared, eventually-consistent index.
///
/// Writers must treat every put as idempotent; readers may observe any
/// interleaving of projections.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Get an entry's value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Get an entry with its metadata.
    async fn get_with_metadata(&self, key: &str) -> Result<Option<IndexEntry>>;

    /// Insert or replace an entry.
    async fn put(
        &self,
        key: &str,
        value: &[u8],
        metadata: Option<&serde_json::Value>,
    ) -> Result<()>;

    /// Delete an entry. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Every entry whose key starts with `prefix`, in key order.
    async fn list(&self, prefix: &str) -> Result<Vec<IndexEntry>>;
}

/// JSON convenience methods for [`KvStore`].
pub trait KvStoreExt: KvStore {
    /// Get and deserialize a JSON value.
    fn get_json<T: DeserializeOwned>(
        &self,
        scope: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<T>>> + Send;

    /// Serialize and store a JSON value.
    fn put_json<T: Serialize + Sync>(
        &self,
        scope: &str,
        key: &str,
        value: &T,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl<S: KvStore + ?Sized> KvStoreExt for S {
    async fn get_json<T: DeserializeOwned>(&self, scope: &str, key: &str) -> Result<Option<T>> {
        match self.get(scope, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize + Sync>(&self, scope: &str, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(scope, key, &bytes).await
    }
}

/// JSON convenience methods for [`IndexStore`].
pub trait IndexStoreExt: IndexStore {
    /// Get and deserialize a JSON value.
    fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<T>>> + Send;

    /// Serialize and store a JSON value.
    fn put_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        metadata: Option<&serde_json::Value>,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl<S: IndexStore + ?Sized> IndexStoreExt for S {
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, &bytes, metadata).await
    }
}
