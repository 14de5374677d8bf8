//! Fetch-through caching for any [`RemoteClient`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use tracksync_cache::{CacheManager, NamespacedCache};

use super::{RemoteClient, RemoteResult};
use crate::domain::{Record, RecordPatch, RemoteError, SyncFilters};

enum FetchThrough {
    Remote(RemoteError),
    Encode(serde_json::Error),
}

/// Caches `fetch_records` under the `records:` namespace.
///
/// Keys are `records:<system>:<sha256 of filters and cursor>`. Every
/// successful write invalidates `records:<system>:*`. Cache trouble is never
/// surfaced: a value that cannot be stored or read back falls through to the
/// wrapped client.
pub struct CachedRemoteClient<C> {
    inner: C,
    cache: NamespacedCache,
}

impl<C: RemoteClient> CachedRemoteClient<C> {
    pub fn new(inner: C, manager: Arc<CacheManager>) -> Self {
        Self::with_cache(inner, NamespacedCache::records(manager))
    }

    pub fn with_cache(inner: C, cache: NamespacedCache) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn cache(&self) -> &NamespacedCache {
        &self.cache
    }

    fn fetch_key(&self, filters: &SyncFilters, since: Option<DateTime<Utc>>) -> String {
        let mut hasher = Sha256::new();
        // Field order is fixed by the derive, so the encoding is stable.
        if let Ok(bytes) = serde_json::to_vec(&(filters, since)) {
            hasher.update(bytes);
        }
        format!("{}:{}", self.inner.system(), hex::encode(hasher.finalize()))
    }

    async fn invalidate(&self) {
        let pattern = format!("{}:*", self.inner.system());
        match self.cache.invalidate(&pattern).await {
            Ok(n) => debug!(system = %self.inner.system(), removed = n, "invalidated cached fetches"),
            Err(e) => warn!(system = %self.inner.system(), error = %e, "cache invalidation failed"),
        }
    }
}

#[async_trait]
impl<C: RemoteClient> RemoteClient for CachedRemoteClient<C> {
    fn system(&self) -> &str {
        self.inner.system()
    }

    async fn fetch_records(
        &self,
        filters: &SyncFilters,
        since: Option<DateTime<Utc>>,
    ) -> RemoteResult<Vec<Record>> {
        let key = self.fetch_key(filters, since);
        let mut fresh: Option<Vec<Record>> = None;
        let slot = &mut fresh;

        let cached = self
            .cache
            .get_or_set(
                &key,
                move || async move {
                    let records = self
                        .inner
                        .fetch_records(filters, since)
                        .await
                        .map_err(FetchThrough::Remote)?;
                    let value = serde_json::to_value(&records).map_err(FetchThrough::Encode);
                    *slot = Some(records);
                    value
                },
                None,
            )
            .await;

        match cached {
            Ok(value) => {
                if let Some(records) = fresh {
                    return Ok(records);
                }
                match serde_json::from_value::<Vec<Record>>(value) {
                    Ok(records) => Ok(records),
                    Err(e) => {
                        warn!(key = %key, error = %e, "discarding unreadable cached fetch");
                        self.cache.delete(&key).await;
                        self.inner.fetch_records(filters, since).await
                    }
                }
            }
            Err(FetchThrough::Remote(e)) => Err(e),
            Err(FetchThrough::Encode(e)) => {
                warn!(key = %key, error = %e, "fetched records not cacheable");
                fresh.ok_or_else(|| RemoteError::Unavailable {
                    system: self.inner.system().to_string(),
                    reason: format!("fetch result could not be encoded: {e}"),
                })
            }
        }
    }

    async fn create_record(&self, record: &Record) -> RemoteResult<Record> {
        let created = self.inner.create_record(record).await?;
        self.invalidate().await;
        Ok(created)
    }

    async fn update_record(&self, id: &str, patch: &RecordPatch) -> RemoteResult<Record> {
        let updated = self.inner.update_record(id, patch).await?;
        self.invalidate().await;
        Ok(updated)
    }

    async fn delete_record(&self, id: &str) -> RemoteResult<()> {
        self.inner.delete_record(id).await?;
        self.invalidate().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryRemoteClient;

    fn manager() -> Arc<CacheManager> {
        Arc::new(CacheManager::in_memory(64, None).unwrap())
    }

    #[tokio::test]
    async fn test_repeated_fetch_is_served_from_cache() {
        let remote = Arc::new(MemoryRemoteClient::with_records(
            "jira",
            vec![Record::new("jira", "J-1", "Fix login bug")],
        ));
        let client = CachedRemoteClient::new(Arc::clone(&remote), manager());

        let first = client.fetch_records(&SyncFilters::default(), None).await.unwrap();
        let second = client.fetch_records(&SyncFilters::default(), None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_different_filters_use_different_keys() {
        let remote = Arc::new(MemoryRemoteClient::new("jira"));
        let client = CachedRemoteClient::new(Arc::clone(&remote), manager());
        let bugs = SyncFilters {
            labels: vec!["bug".to_string()],
            ..SyncFilters::default()
        };

        client.fetch_records(&SyncFilters::default(), None).await.unwrap();
        client.fetch_records(&bugs, None).await.unwrap();

        assert_eq!(remote.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_write_invalidates_system_namespace() {
        let remote = Arc::new(MemoryRemoteClient::new("jira"));
        let cache = manager();
        let client = CachedRemoteClient::new(Arc::clone(&remote), Arc::clone(&cache));

        assert!(client
            .fetch_records(&SyncFilters::default(), None)
            .await
            .unwrap()
            .is_empty());
        client
            .create_record(&Record::new("jira", "", "New"))
            .await
            .unwrap();
        let after = client.fetch_records(&SyncFilters::default(), None).await.unwrap();

        assert_eq!(after.len(), 1);
        assert_eq!(remote.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_remote_failure_is_not_cached() {
        let remote = Arc::new(MemoryRemoteClient::new("jira"));
        remote.set_unavailable(true);
        let client = CachedRemoteClient::new(Arc::clone(&remote), manager());

        let err = client
            .fetch_records(&SyncFilters::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable { .. }));

        remote.set_unavailable(false);
        assert!(client.fetch_records(&SyncFilters::default(), None).await.is_ok());
        assert_eq!(client.cache().manager().size().await, 1);
    }
}
