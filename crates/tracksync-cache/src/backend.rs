//! Storage abstraction behind [`CacheManager`](crate::CacheManager).
//!
//! Backends store entries verbatim; TTL checks, statistics and error
//! degradation live in the manager.

use async_trait::async_trait;

use crate::config::BackendKind;
use crate::entry::CacheEntry;
use crate::error::CacheResult;

/// Pluggable key-value storage for cache entries.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Which tier this backend implements.
    fn kind(&self) -> BackendKind;

    /// Fetch an entry, counting as a use for recency purposes.
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Fetch an entry without touching recency.
    async fn peek(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Insert or overwrite an entry. May evict other entries; never fails
    /// because of capacity.
    async fn set(&self, entry: CacheEntry) -> CacheResult<()>;

    /// Remove an entry. Returns whether it was present.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remove every entry.
    async fn clear(&self) -> CacheResult<()>;

    /// All stored keys, expired or not.
    async fn keys(&self) -> CacheResult<Vec<String>>;

    /// Number of stored entries, expired or not.
    async fn len(&self) -> CacheResult<usize>;

    /// All stored entries, expired or not.
    async fn entries(&self) -> CacheResult<Vec<CacheEntry>>;
}
