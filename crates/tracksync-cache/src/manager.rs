//! Cache front-end shared by every caller in a process.
//!
//! The manager owns TTL semantics (absolute expiry, lazy expiry on read,
//! periodic sweep), hit/miss statistics, fetch-through with per-key
//! single-flight, glob invalidation and snapshot export/import.
//!
//! Backend failures never reach callers of `get`/`set`/`get_or_set`: they are
//! logged and treated as a miss. Writes are last-writer-wins per key.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::CacheBackend;
use crate::config::{BackendKind, CacheConfig};
use crate::disk::DiskBackend;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::hybrid::HybridBackend;
use crate::memory::MemoryBackend;

/// Cumulative statistics since construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries currently stored (expired entries count until swept).
    pub size: usize,
}

impl CacheStats {
    /// `hits / (hits + misses)`, or 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Full key -> value dump used for warm starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub entries: BTreeMap<String, Value>,
}

pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheManager {
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Option<Duration>) -> Self {
        Self {
            backend,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Memory-only manager holding at most `capacity` entries.
    pub fn in_memory(capacity: usize, default_ttl: Option<Duration>) -> CacheResult<Self> {
        Ok(Self::new(
            Arc::new(MemoryBackend::with_capacity(capacity)?),
            default_ttl,
        ))
    }

    /// Build the backend selected by `config`.
    pub fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let backend: Arc<dyn CacheBackend> = match config.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::with_capacity(config.capacity)?),
            BackendKind::Disk => Arc::new(DiskBackend::new(
                &config.disk_root,
                config.disk_max_bytes,
            )),
            BackendKind::Hybrid => Arc::new(HybridBackend::new(
                MemoryBackend::with_capacity(config.capacity)?,
                DiskBackend::new(&config.disk_root, config.disk_max_bytes),
                config.hybrid_threshold_bytes,
            )),
        };
        info!(backend = %config.backend, capacity = config.capacity, "cache initialised");
        Ok(Self::new(backend, config.default_ttl()))
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    async fn lookup(&self, key: &str, record: bool) -> Option<Value> {
        let found = match self.backend.get(key).await {
            Ok(Some(entry)) if entry.is_expired() => {
                debug!(key = %key, "cache entry expired");
                if let Err(e) = self.backend.delete(key).await {
                    warn!(key = %key, error = %e, "failed to drop expired cache entry");
                }
                None
            }
            Ok(Some(entry)) => Some(entry.value),
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed; treating as miss");
                None
            }
        };
        if record {
            match found {
                Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
                None => self.misses.fetch_add(1, Ordering::Relaxed),
            };
        }
        found
    }

    /// Value for `key`, or `None` when absent, expired or unreadable.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.lookup(key, true).await
    }

    /// Store `value` under `key`. `ttl` overrides the default TTL.
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let entry = CacheEntry::new(key, value, ttl.or(self.default_ttl));
        if let Err(e) = self.backend.set(entry).await {
            warn!(key = %key, error = %e, "cache write failed; value not cached");
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        match self.backend.delete(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, error = %e, "cache delete failed");
                false
            }
        }
    }

    pub async fn clear(&self) {
        if let Err(e) = self.backend.clear().await {
            warn!(error = %e, "cache clear failed");
        }
    }

    pub async fn keys(&self) -> Vec<String> {
        self.backend.keys().await.unwrap_or_else(|e| {
            warn!(error = %e, "cache key listing failed");
            Vec::new()
        })
    }

    pub async fn size(&self) -> usize {
        self.backend.len().await.unwrap_or_else(|e| {
            warn!(error = %e, "cache size query failed");
            0
        })
    }

    /// Whether a live entry exists. Does not affect recency or statistics.
    pub async fn has(&self, key: &str) -> bool {
        matches!(self.backend.peek(key).await, Ok(Some(entry)) if !entry.is_expired())
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// Concurrent callers missing on the same key wait for the first
    /// fetcher instead of invoking their own, so `fetcher` runs at most once
    /// per miss within this process. A failing fetcher caches nothing.
    pub async fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Option<Duration>,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(value) = self.lookup(key, true).await {
            return Ok(value);
        }

        let key_lock = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(key.to_string()).or_default())
        };
        let result = {
            let _guard = key_lock.lock().await;
            // Another caller may have filled the key while we waited.
            match self.lookup(key, false).await {
                Some(value) => Ok(value),
                None => match fetcher().await {
                    Ok(value) => {
                        self.set(key, value.clone(), ttl).await;
                        Ok(value)
                    }
                    Err(e) => Err(e),
                },
            }
        };

        let mut inflight = self.inflight.lock().await;
        if Arc::strong_count(&key_lock) <= 2 {
            inflight.remove(key);
        }
        result
    }

    /// Typed read; a value that no longer deserializes is treated as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key = %key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Typed write; values that fail to serialize are not cached.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v, ttl).await,
            Err(e) => warn!(key = %key, error = %e, "value not serializable; not cached"),
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let entries = match self.backend.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cache sweep could not list entries");
                return 0;
            }
        };
        let now = chrono::Utc::now();
        let mut removed = 0;
        for entry in entries.iter().filter(|e| e.is_expired_at(now)) {
            if self.delete(&entry.key).await {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "swept expired cache entries");
        }
        removed
    }

    /// Remove all keys matching a glob (`*` any run, `?` one char).
    /// Returns how many were removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let re = glob_to_regex(pattern)?;
        let mut removed = 0;
        for key in self.keys().await {
            if re.is_match(&key) && self.delete(&key).await {
                removed += 1;
            }
        }
        debug!(pattern = %pattern, removed, "invalidated cache keys");
        Ok(removed)
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.size().await,
        }
    }

    /// Snapshot of every live entry.
    pub async fn export(&self) -> CacheResult<CacheSnapshot> {
        let now = chrono::Utc::now();
        let entries = self
            .backend
            .entries()
            .await?
            .into_iter()
            .filter(|e| !e.is_expired_at(now))
            .map(|e| (e.key, e.value))
            .collect();
        Ok(CacheSnapshot { entries })
    }

    /// Replace the whole cache with `snapshot`; entries get the default TTL.
    /// Returns how many entries were loaded.
    pub async fn import(&self, snapshot: CacheSnapshot) -> CacheResult<usize> {
        self.backend.clear().await?;
        let count = snapshot.entries.len();
        for (key, value) in snapshot.entries {
            self.backend
                .set(CacheEntry::new(key, value, self.default_ttl))
                .await?;
        }
        info!(entries = count, "cache snapshot imported");
        Ok(count)
    }

    pub async fn export_to_writer<W: Write>(&self, writer: W) -> CacheResult<usize> {
        let snapshot = self.export().await?;
        let count = snapshot.entries.len();
        serde_json::to_writer(writer, &snapshot)?;
        Ok(count)
    }

    pub async fn import_from_reader<R: Read>(&self, reader: R) -> CacheResult<usize> {
        let snapshot: CacheSnapshot = serde_json::from_reader(reader)?;
        self.import(snapshot).await
    }

    /// Run [`cleanup_expired`](Self::cleanup_expired) every `interval` until
    /// the returned handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.cleanup_expired().await;
            }
        })
    }
}

fn glob_to_regex(pattern: &str) -> CacheResult<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| CacheError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn manager(capacity: usize) -> CacheManager {
        CacheManager::in_memory(capacity, None).unwrap()
    }

    #[test]
    fn test_glob_matches_whole_key() {
        let re = glob_to_regex("records:a:*").unwrap();
        assert!(re.is_match("records:a:123"));
        assert!(!re.is_match("xrecords:a:123"));
        assert!(!re.is_match("records:b:1"));

        let re = glob_to_regex("k?").unwrap();
        assert!(re.is_match("k1"));
        assert!(!re.is_match("k12"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let re = glob_to_regex("a.b+(c)").unwrap();
        assert!(re.is_match("a.b+(c)"));
        assert!(!re.is_match("aXb+(c)"));
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            size: 0,
        };
        assert_eq!(stats.hit_rate(), 0.75);
        let empty = CacheStats {
            hits: 0,
            misses: 0,
            size: 0,
        };
        assert_eq!(empty.hit_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_stats_count_hits_and_misses() {
        let cache = manager(8);
        cache.set("a", json!(1), None).await;
        assert_eq!(cache.get("a").await, Some(json!(1)));
        assert_eq!(cache.get("missing").await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_get_or_set_skips_fetcher_on_hit() {
        let cache = manager(8);
        cache.set("k", json!("cached"), None).await;
        let calls = AtomicUsize::new(0);

        let value = cache
            .get_or_set(
                "k",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(json!("fresh"))
                },
                None,
            )
            .await;
        assert_eq!(value.unwrap(), json!("cached"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_or_set_runs_fetcher_once_for_concurrent_misses() {
        let cache = Arc::new(manager(8));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_set(
                        "shared",
                        || async {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, String>(json!("fetched"))
                        },
                        None,
                    )
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), json!("fetched"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_set_error_caches_nothing() {
        let cache = manager(8);
        let res: Result<Value, String> = cache
            .get_or_set("k", || async { Err("upstream down".to_string()) }, None)
            .await;
        assert_eq!(res.unwrap_err(), "upstream down");
        assert!(!cache.has("k").await);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_removes_matching_keys_only() {
        let cache = manager(8);
        cache.set("records:a:1", json!(1), None).await;
        cache.set("records:a:2", json!(2), None).await;
        cache.set("records:b:1", json!(3), None).await;

        let removed = cache.invalidate_pattern("records:a:*").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.keys().await, vec!["records:b:1".to_string()]);
    }

    #[tokio::test]
    async fn test_typed_helpers_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Item {
            title: String,
        }
        let cache = manager(8);
        let item = Item {
            title: "Fix login bug".to_string(),
        };
        cache.set_json("item", &item, None).await;
        assert_eq!(cache.get_json::<Item>("item").await, Some(item));
        assert_eq!(cache.get_json::<u32>("item").await, None);
    }

    #[tokio::test]
    async fn test_import_overwrites_instead_of_merging() {
        let cache = manager(8);
        cache.set("stale", json!("old"), None).await;

        let mut snapshot = CacheSnapshot::default();
        snapshot.entries.insert("fresh".to_string(), json!("new"));
        assert_eq!(cache.import(snapshot).await.unwrap(), 1);

        assert!(!cache.has("stale").await);
        assert_eq!(cache.get("fresh").await, Some(json!("new")));
    }

    #[tokio::test]
    async fn test_export_skips_expired_entries() {
        let cache = manager(8);
        cache.set("live", json!(1), None).await;
        cache
            .set("dead", json!(2), Some(Duration::from_millis(1)))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = cache.export().await.unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert!(snapshot.entries.contains_key("live"));
    }
}
