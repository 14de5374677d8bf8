use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::CacheBackend;
use crate::config::BackendKind;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};

/// On-disk size and age of every entry file this backend knows about.
#[derive(Debug, Default)]
struct SizeIndex {
    total: u64,
    files: HashMap<PathBuf, (u64, DateTime<Utc>)>,
}

impl SizeIndex {
    fn insert(&mut self, path: PathBuf, len: u64, created_at: DateTime<Utc>) {
        if let Some((old, _)) = self.files.insert(path, (len, created_at)) {
            self.total = self.total.saturating_sub(old);
        }
        self.total += len;
    }

    fn remove(&mut self, path: &Path) {
        if let Some((len, _)) = self.files.remove(path) {
            self.total = self.total.saturating_sub(len);
        }
    }

    /// Known files, oldest entry first.
    fn oldest_first(&self) -> Vec<(PathBuf, u64)> {
        let mut files: Vec<_> = self
            .files
            .iter()
            .map(|(path, (len, created_at))| (*created_at, path.clone(), *len))
            .collect();
        files.sort();
        files.into_iter().map(|(_, path, len)| (path, len)).collect()
    }
}

/// Filesystem-backed cache tier with git-style 2-char sharding.
///
/// Layout: `<root>/<first 2 hex chars>/<remaining hex chars>.json`, where the
/// hex string is the SHA-256 of the key. Each file holds one serialized
/// [`CacheEntry`]. Directories are created on demand. When the total stored
/// size exceeds the byte budget the oldest entries are removed first.
///
/// The directory is scanned once, on the first write; after that sizes are
/// tracked as entries are written and removed. Files written by another
/// process into the same root are not accounted for until restart.
pub struct DiskBackend {
    root: PathBuf,
    max_bytes: u64,
    // Also serializes writers, so eviction sees a consistent index.
    index: Mutex<Option<SizeIndex>>,
}

impl DiskBackend {
    pub fn new(root: impl AsRef<Path>, max_bytes: u64) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_bytes,
            index: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bytes currently accounted to this backend. Zero before the first write.
    pub async fn tracked_bytes(&self) -> u64 {
        self.index.lock().await.as_ref().map_or(0, |index| index.total)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let hex = hex::encode(Sha256::digest(key.as_bytes()));
        self.root.join(&hex[..2]).join(format!("{}.json", &hex[2..]))
    }

    async fn read_entry(path: &Path) -> CacheResult<Option<CacheEntry>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// Every readable entry on disk with its file path and on-disk size.
    async fn scan(&self) -> CacheResult<Vec<(PathBuf, u64, CacheEntry)>> {
        let mut found = Vec::new();
        let mut shards = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(CacheError::Io(e)),
        };

        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(shard.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let len = file.metadata().await?.len();
                match Self::read_entry(&path).await {
                    Ok(Some(entry)) => found.push((path, len, entry)),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable cache file");
                    }
                }
            }
        }
        Ok(found)
    }

    async fn load_index(&self) -> CacheResult<SizeIndex> {
        let mut index = SizeIndex::default();
        for (path, len, entry) in self.scan().await? {
            index.insert(path, len, entry.created_at);
        }
        debug!(root = %self.root.display(), files = index.files.len(), bytes = index.total, "disk cache index loaded");
        Ok(index)
    }

    async fn enforce_budget(&self, index: &mut SizeIndex) {
        if index.total <= self.max_bytes {
            return;
        }
        for (path, _) in index.oldest_first() {
            if index.total <= self.max_bytes {
                break;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "evicted disk cache entry over byte budget"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to evict disk cache entry");
                    continue;
                }
            }
            index.remove(&path);
        }
    }
}

#[async_trait]
impl CacheBackend for DiskBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Disk
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let entry = Self::read_entry(&self.entry_path(key)).await?;
        Ok(entry.filter(|e| e.key == key))
    }

    async fn peek(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        self.get(key).await
    }

    async fn set(&self, entry: CacheEntry) -> CacheResult<()> {
        let path = self.entry_path(&entry.key);
        let data = serde_json::to_vec(&entry)?;
        let len = data.len() as u64;

        let mut guard = self.index.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_index().await?);
        }

        let target = path.clone();
        tokio::task::spawn_blocking(move || -> CacheResult<()> {
            let shard_dir = target
                .parent()
                .ok_or_else(|| CacheError::Backend("cache path has no parent".to_string()))?;
            std::fs::create_dir_all(shard_dir)?;

            // Atomic write: temp file in the same directory, then rename.
            let mut tmp = NamedTempFile::new_in(shard_dir)?;
            tmp.write_all(&data)?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::Backend(e.to_string()))??;

        if let Some(index) = guard.as_mut() {
            index.insert(path, len, entry.created_at);
            self.enforce_budget(index).await;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let path = self.entry_path(key);
        let mut guard = self.index.lock().await;
        let removed = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(CacheError::Io(e)),
        };
        if let Some(index) = guard.as_mut() {
            index.remove(&path);
        }
        Ok(removed)
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut guard = self.index.lock().await;
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::Io(e)),
        }
        *guard = Some(SizeIndex::default());
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.scan().await?.into_iter().map(|(_, _, e)| e.key).collect())
    }

    async fn len(&self) -> CacheResult<usize> {
        Ok(self.scan().await?.len())
    }

    async fn entries(&self) -> CacheResult<Vec<CacheEntry>> {
        Ok(self.scan().await?.into_iter().map(|(_, _, e)| e).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_backend(max_bytes: u64) -> (tempfile::TempDir, DiskBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::new(dir.path().join("cache"), max_bytes);
        (dir, backend)
    }

    #[tokio::test]
    async fn test_entry_roundtrip_creates_directory_on_demand() {
        let (_dir, backend) = make_backend(1024 * 1024);
        assert!(!backend.root().exists());

        let entry = CacheEntry::new("records:a:1", json!({"title": "x"}), None);
        backend.set(entry.clone()).await.unwrap();

        assert!(backend.root().exists());
        assert_eq!(backend.get("records:a:1").await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_file_name_is_key_hash() {
        let (_dir, backend) = make_backend(1024 * 1024);
        backend
            .set(CacheEntry::new("some-key", json!(1), None))
            .await
            .unwrap();

        let hex = hex::encode(Sha256::digest(b"some-key"));
        let expected = backend
            .root()
            .join(&hex[..2])
            .join(format!("{}.json", &hex[2..]));
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let (_dir, backend) = make_backend(1024);
        assert!(backend.get("nope").await.unwrap().is_none());
        assert!(!backend.delete("nope").await.unwrap());
        assert!(backend.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_budget_evicts_oldest_first() {
        let payload = "x".repeat(200);
        let entry_len = serde_json::to_vec(&CacheEntry::new("k0", json!(payload), None))
            .unwrap()
            .len() as u64;
        // Room for two entries, not three.
        let (_dir, backend) = make_backend(entry_len * 2 + entry_len / 2);

        for k in ["k0", "k1", "k2"] {
            backend
                .set(CacheEntry::new(k, json!(payload), None))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let mut keys = backend.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let (_dir, backend) = make_backend(1024 * 1024);
        backend.set(CacheEntry::new("a", json!(1), None)).await.unwrap();
        backend.set(CacheEntry::new("b", json!(2), None)).await.unwrap();
        assert_eq!(backend.len().await.unwrap(), 2);

        backend.clear().await.unwrap();
        assert_eq!(backend.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_skipped_by_scan() {
        let (_dir, backend) = make_backend(1024 * 1024);
        backend.set(CacheEntry::new("good", json!(1), None)).await.unwrap();

        let shard = backend.root().join("zz");
        std::fs::create_dir_all(&shard).unwrap();
        std::fs::write(shard.join("broken.json"), b"{not json").unwrap();

        assert_eq!(backend.keys().await.unwrap(), vec!["good".to_string()]);
    }

    #[tokio::test]
    async fn test_deleted_entries_free_budget_without_rescan() {
        let payload = "x".repeat(200);
        let size = serde_json::to_vec(&CacheEntry::new("k0", json!(payload), None))
            .unwrap()
            .len() as u64;
        let (_dir, backend) = make_backend(size * 2 + size / 2);

        backend.set(CacheEntry::new("k0", json!(payload), None)).await.unwrap();
        backend.set(CacheEntry::new("k1", json!(payload), None)).await.unwrap();
        assert_eq!(backend.tracked_bytes().await, size * 2);

        assert!(backend.delete("k0").await.unwrap());
        assert_eq!(backend.tracked_bytes().await, size);

        backend.set(CacheEntry::new("k2", json!(payload), None)).await.unwrap();
        let mut keys = backend.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn test_existing_files_are_counted_on_first_write() {
        let payload = "x".repeat(200);
        let size = serde_json::to_vec(&CacheEntry::new("k0", json!(payload), None))
            .unwrap()
            .len() as u64;
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");

        let earlier = DiskBackend::new(&root, size * 10);
        earlier.set(CacheEntry::new("k0", json!(payload), None)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        earlier.set(CacheEntry::new("k1", json!(payload), None)).await.unwrap();
        drop(earlier);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // Reopened with room for two: the oldest file from before goes.
        let reopened = DiskBackend::new(&root, size * 2 + size / 2);
        reopened.set(CacheEntry::new("k2", json!(payload), None)).await.unwrap();

        let mut keys = reopened.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k1", "k2"]);
        assert_eq!(reopened.tracked_bytes().await, size * 2);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_tracked_size() {
        let (_dir, backend) = make_backend(1024 * 1024);
        backend.set(CacheEntry::new("k", json!("short"), None)).await.unwrap();
        backend
            .set(CacheEntry::new("k", json!("a considerably longer value"), None))
            .await
            .unwrap();

        let len = serde_json::to_vec(&backend.get("k").await.unwrap().unwrap())
            .unwrap()
            .len() as u64;
        assert_eq!(backend.tracked_bytes().await, len);
    }
}
