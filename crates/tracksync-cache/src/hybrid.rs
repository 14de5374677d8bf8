//! Two-tier backend: small values in memory, large values on disk.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::CacheBackend;
use crate::config::BackendKind;
use crate::disk::DiskBackend;
use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::memory::MemoryBackend;

/// Routes entries by size and promotes disk hits into memory.
///
/// Entries whose `size` is at most `threshold` bytes live in the memory tier;
/// larger ones are written to disk. A disk hit is copied into memory
/// (read-through promotion) and kept on disk, so a later memory eviction does
/// not lose it.
pub struct HybridBackend {
    memory: MemoryBackend,
    disk: DiskBackend,
    threshold: usize,
}

impl HybridBackend {
    pub fn new(memory: MemoryBackend, disk: DiskBackend, threshold: usize) -> Self {
        Self {
            memory,
            disk,
            threshold,
        }
    }

    pub fn memory(&self) -> &MemoryBackend {
        &self.memory
    }

    pub fn disk(&self) -> &DiskBackend {
        &self.disk
    }
}

#[async_trait]
impl CacheBackend for HybridBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hybrid
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        if let Some(entry) = self.memory.get(key).await? {
            return Ok(Some(entry));
        }
        let Some(entry) = self.disk.get(key).await? else {
            return Ok(None);
        };
        debug!(key = %key, size = entry.size, "promoting disk cache entry to memory");
        self.memory.set(entry.clone()).await?;
        Ok(Some(entry))
    }

    async fn peek(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        match self.memory.peek(key).await? {
            Some(entry) => Ok(Some(entry)),
            None => self.disk.peek(key).await,
        }
    }

    async fn set(&self, entry: CacheEntry) -> CacheResult<()> {
        let key = entry.key.clone();
        if entry.size <= self.threshold {
            self.memory.set(entry).await?;
            self.disk.delete(&key).await?;
        } else {
            self.disk.set(entry).await?;
            self.memory.delete(&key).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let in_memory = self.memory.delete(key).await?;
        let on_disk = self.disk.delete(key).await?;
        Ok(in_memory || on_disk)
    }

    async fn clear(&self) -> CacheResult<()> {
        self.memory.clear().await?;
        self.disk.clear().await
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.entries().await?.into_iter().map(|e| e.key).collect())
    }

    async fn len(&self) -> CacheResult<usize> {
        Ok(self.entries().await?.len())
    }

    async fn entries(&self) -> CacheResult<Vec<CacheEntry>> {
        // Memory copies shadow disk copies of the same key.
        let mut merged: BTreeMap<String, CacheEntry> = BTreeMap::new();
        for entry in self.disk.entries().await? {
            merged.insert(entry.key.clone(), entry);
        }
        for entry in self.memory.entries().await? {
            merged.insert(entry.key.clone(), entry);
        }
        Ok(merged.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_hybrid(threshold: usize) -> (tempfile::TempDir, HybridBackend) {
        let dir = tempfile::tempdir().unwrap();
        let hybrid = HybridBackend::new(
            MemoryBackend::with_capacity(8).unwrap(),
            DiskBackend::new(dir.path(), 1024 * 1024),
            threshold,
        );
        (dir, hybrid)
    }

    #[tokio::test]
    async fn test_small_values_stay_in_memory() {
        let (_dir, hybrid) = make_hybrid(64);
        hybrid.set(CacheEntry::new("small", json!("tiny"), None)).await.unwrap();

        assert!(hybrid.memory().peek("small").await.unwrap().is_some());
        assert!(hybrid.disk().peek("small").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_large_values_go_to_disk_and_promote_on_read() {
        let (_dir, hybrid) = make_hybrid(64);
        let big = json!("y".repeat(500));
        hybrid.set(CacheEntry::new("big", big.clone(), None)).await.unwrap();

        assert!(hybrid.memory().peek("big").await.unwrap().is_none());
        assert!(hybrid.disk().peek("big").await.unwrap().is_some());

        let got = hybrid.get("big").await.unwrap().unwrap();
        assert_eq!(got.value, big);
        assert!(hybrid.memory().peek("big").await.unwrap().is_some());
        assert!(hybrid.disk().peek("big").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_keys_are_deduplicated_across_tiers() {
        let (_dir, hybrid) = make_hybrid(64);
        hybrid.set(CacheEntry::new("small", json!(1), None)).await.unwrap();
        hybrid
            .set(CacheEntry::new("big", json!("z".repeat(500)), None))
            .await
            .unwrap();
        hybrid.get("big").await.unwrap();

        assert_eq!(hybrid.keys().await.unwrap(), vec!["big", "small"]);
        assert_eq!(hybrid.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_shrinking_value_moves_to_memory() {
        let (_dir, hybrid) = make_hybrid(64);
        hybrid
            .set(CacheEntry::new("k", json!("w".repeat(500)), None))
            .await
            .unwrap();
        hybrid.set(CacheEntry::new("k", json!("w"), None)).await.unwrap();

        assert!(hybrid.disk().peek("k").await.unwrap().is_none());
        assert_eq!(hybrid.get("k").await.unwrap().unwrap().value, json!("w"));
    }

    #[tokio::test]
    async fn test_delete_removes_from_both_tiers() {
        let (_dir, hybrid) = make_hybrid(64);
        hybrid
            .set(CacheEntry::new("big", json!("q".repeat(500)), None))
            .await
            .unwrap();
        hybrid.get("big").await.unwrap();

        assert!(hybrid.delete("big").await.unwrap());
        assert!(hybrid.get("big").await.unwrap().is_none());
    }
}
