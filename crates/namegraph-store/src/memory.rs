//! In-memory implementations of the storage traits.
//!
//! These are primarily for testing. They have the same semantics as SQLite
//! but keep everything in memory with no persistence.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::traits::{IndexEntry, IndexStore, KvStore, ListOptions};

/// In-memory actor state store.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Values by scope, then key.
    scopes: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Number of keys held in a scope.
    pub fn scope_len(&self, scope: &str) -> usize {
        self.inner
            .read()
            .map(|inner| inner.scopes.get(scope).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.scopes.get(scope).and_then(|s| s.get(key)).cloned())
    }

    async fn put(&self, scope: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        inner
            .scopes
            .entry(scope.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, scope: &str, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .scopes
            .get_mut(scope)
            .map(|s| s.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn list(&self, scope: &str, options: &ListOptions) -> Result<Vec<(String, Vec<u8>)>> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let entries = match inner.scopes.get(scope) {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };

        let limit = options.limit.unwrap_or(usize::MAX);
        let matching = entries.iter().filter(|(k, _)| options.matches(k));
        let items = if options.reverse {
            matching
                .rev()
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        } else {
            matching
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        Ok(items)
    }
}

/// In-memory index.
pub struct MemoryIndex {
    entries: RwLock<BTreeMap<String, IndexEntry>>,
}

impl MemoryIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Every key currently in the index.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexStore for MemoryIndex {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn get_with_metadata(&self, key: &str) -> Result<Option<IndexEntry>> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        value: &[u8],
        metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(
            key.to_string(),
            IndexEntry {
                key: key.to_string(),
                value: value.to_vec(),
                metadata: metadata.cloned(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<IndexEntry>> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, e)| e.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{IndexStoreExt, KvStoreExt};

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for rev in [1u64, 5, 9, 12] {
            let key = format!("commit:{:020}", rev);
            store.put("note", &key, &rev.to_be_bytes()).await.unwrap();
        }
        store.put("note", "config", b"{}").await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        store.put("a", "k", b"v1").await.unwrap();
        assert_eq!(store.get("a", "k").await.unwrap(), Some(b"v1".to_vec()));
        assert_eq!(store.get("b", "k").await.unwrap(), None);

        store.put("a", "k", b"v2").await.unwrap();
        assert_eq!(store.get("a", "k").await.unwrap(), Some(b"v2".to_vec()));

        assert!(store.delete("a", "k").await.unwrap());
        assert!(!store.delete("a", "k").await.unwrap());
        assert_eq!(store.get("a", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_prefix_ordering() {
        let store = seeded().await;
        let all = store.list("note", &ListOptions::prefix("commit:")).await.unwrap();
        let keys: Vec<_> = all.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys.len(), 4);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_list_reverse_with_end_and_limit() {
        let store = seeded().await;
        let opts = ListOptions::prefix("commit:")
            .end(format!("commit:{:020}", 10))
            .limit(2)
            .reverse();
        let items = store.list("note", &opts).await.unwrap();
        let revs: Vec<u64> = items
            .iter()
            .map(|(_, v)| u64::from_be_bytes(v.as_slice().try_into().unwrap()))
            .collect();
        assert_eq!(revs, vec![9, 5]);
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let store = seeded().await;
        assert_eq!(store.scope_len("note"), 5);
        assert!(store.list("other", &ListOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MemoryStore::new();
        store.put_json("s", "k", &vec![1, 2, 3]).await.unwrap();
        let back: Option<Vec<u32>> = store.get_json("s", "k").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_index_prefix_list() {
        let index = MemoryIndex::new();
        let meta = serde_json::json!({"addr": "0x01"});
        index.put("domains:0xaa:1", b"", Some(&meta)).await.unwrap();
        index.put("domains:0xaa:2", b"", None).await.unwrap();
        index.put("domains:0xab:3", b"", None).await.unwrap();
        index.put_json("domain:1", &serde_json::json!({"fqn": "a"}), None).await.unwrap();

        let listed = index.list("domains:0xaa:").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].metadata, Some(meta));

        index.delete("domains:0xaa:1").await.unwrap();
        index.delete("missing").await.unwrap();
        assert_eq!(index.list("domains:0xaa:").await.unwrap().len(), 1);

        let domain: Option<serde_json::Value> = index.get_json("domain:1").await.unwrap();
        assert_eq!(domain.unwrap()["fqn"], "a");
    }
}
