//! Bounded in-process LRU tier.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::CacheBackend;
use crate::config::BackendKind;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};

/// Memory backend with entry-count capacity and least-recently-used eviction.
///
/// Both `get` and `set` refresh recency. Inserting past capacity evicts the
/// least-recently-used entry before the insert returns.
pub struct MemoryBackend {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryBackend {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Create a backend holding at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> CacheResult<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            CacheError::InvalidConfig("memory capacity must be at least 1".to_string())
        })?;
        Ok(Self::new(capacity))
    }

    pub async fn capacity(&self) -> usize {
        self.entries.lock().await.cap().get()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn peek(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        Ok(self.entries.lock().await.peek(key).cloned())
    }

    async fn set(&self, entry: CacheEntry) -> CacheResult<()> {
        let key = entry.key.clone();
        let mut entries = self.entries.lock().await;
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                debug!(key = %evicted, "evicted least-recently-used cache entry");
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.lock().await.pop(key).is_some())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        let entries = self.entries.lock().await;
        // Least recently used first.
        Ok(entries.iter().rev().map(|(k, _)| k.clone()).collect())
    }

    async fn len(&self) -> CacheResult<usize> {
        Ok(self.entries.lock().await.len())
    }

    async fn entries(&self) -> CacheResult<Vec<CacheEntry>> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().rev().map(|(_, v)| v.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry::new(key, json!(key), None)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(MemoryBackend::with_capacity(0).is_err());
    }

    #[tokio::test]
    async fn test_get_refreshes_recency() {
        let backend = MemoryBackend::with_capacity(3).unwrap();
        for k in ["k1", "k2", "k3"] {
            backend.set(entry(k)).await.unwrap();
        }
        assert!(backend.get("k1").await.unwrap().is_some());
        backend.set(entry("k4")).await.unwrap();

        let mut keys = backend.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k1", "k3", "k4"]);
    }

    #[tokio::test]
    async fn test_peek_does_not_refresh_recency() {
        let backend = MemoryBackend::with_capacity(2).unwrap();
        backend.set(entry("a")).await.unwrap();
        backend.set(entry("b")).await.unwrap();
        assert!(backend.peek("a").await.unwrap().is_some());
        backend.set(entry("c")).await.unwrap();

        assert!(backend.peek("a").await.unwrap().is_none());
        assert_eq!(backend.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_overwrite_same_key_does_not_evict() {
        let backend = MemoryBackend::with_capacity(2).unwrap();
        backend.set(entry("a")).await.unwrap();
        backend.set(entry("b")).await.unwrap();
        backend
            .set(CacheEntry::new("a", json!("updated"), None))
            .await
            .unwrap();

        assert_eq!(backend.len().await.unwrap(), 2);
        assert_eq!(backend.get("a").await.unwrap().unwrap().value, json!("updated"));
        assert!(backend.get("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let backend = MemoryBackend::with_capacity(4).unwrap();
        backend.set(entry("a")).await.unwrap();
        backend.set(entry("b")).await.unwrap();

        assert!(backend.delete("a").await.unwrap());
        assert!(!backend.delete("a").await.unwrap());
        backend.clear().await.unwrap();
        assert_eq!(backend.len().await.unwrap(), 0);
    }
}
