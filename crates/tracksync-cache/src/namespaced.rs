//! Domain key namespaces over a shared [`CacheManager`].
//!
//! Pure sugar: a fixed key prefix plus a default TTL suited to the data.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::CacheResult;
use crate::manager::CacheManager;

pub const RECORDS_PREFIX: &str = "records:";
pub const USERS_PREFIX: &str = "users:";
pub const PROJECTS_PREFIX: &str = "projects:";

const RECORDS_TTL: Duration = Duration::from_secs(5 * 60);
const DIRECTORY_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct NamespacedCache {
    manager: Arc<CacheManager>,
    prefix: String,
    default_ttl: Duration,
}

impl NamespacedCache {
    pub fn new(manager: Arc<CacheManager>, prefix: impl Into<String>, default_ttl: Duration) -> Self {
        Self {
            manager,
            prefix: prefix.into(),
            default_ttl,
        }
    }

    /// Fetched tracker records; short-lived.
    pub fn records(manager: Arc<CacheManager>) -> Self {
        Self::new(manager, RECORDS_PREFIX, RECORDS_TTL)
    }

    /// User directory lookups (assignee resolution).
    pub fn users(manager: Arc<CacheManager>) -> Self {
        Self::new(manager, USERS_PREFIX, DIRECTORY_TTL)
    }

    /// Project / repository descriptors.
    pub fn projects(manager: Arc<CacheManager>) -> Self {
        Self::new(manager, PROJECTS_PREFIX, DIRECTORY_TTL)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    pub fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.manager.get(&self.key(key)).await
    }

    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        self.manager
            .set(&self.key(key), value, Some(ttl.unwrap_or(self.default_ttl)))
            .await
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.manager.delete(&self.key(key)).await
    }

    pub async fn has(&self, key: &str) -> bool {
        self.manager.has(&self.key(key)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.manager.get_json(&self.key(key)).await
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        self.manager
            .set_json(&self.key(key), value, Some(ttl.unwrap_or(self.default_ttl)))
            .await
    }

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
        self.manager
            .get_or_set(&self.key(key), fetcher, Some(ttl.unwrap_or(self.default_ttl)))
            .await
    }

    /// Invalidate keys in this namespace matching `pattern`.
    pub async fn invalidate(&self, pattern: &str) -> CacheResult<usize> {
        self.manager.invalidate_pattern(&self.key(pattern)).await
    }

    /// Drop every key in this namespace.
    pub async fn clear(&self) -> CacheResult<usize> {
        self.invalidate("*").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shared() -> Arc<CacheManager> {
        Arc::new(CacheManager::in_memory(16, None).unwrap())
    }

    #[tokio::test]
    async fn test_prefix_is_applied() {
        let manager = shared();
        let records = NamespacedCache::records(Arc::clone(&manager));
        records.set("a:1", json!("x"), None).await;

        assert_eq!(manager.get("records:a:1").await, Some(json!("x")));
        assert_eq!(records.get("a:1").await, Some(json!("x")));
    }

    #[tokio::test]
    async fn test_namespaces_do_not_collide() {
        let manager = shared();
        let users = NamespacedCache::users(Arc::clone(&manager));
        let projects = NamespacedCache::projects(Arc::clone(&manager));
        users.set("1", json!("alice"), None).await;
        projects.set("1", json!("core"), None).await;

        assert_eq!(users.clear().await.unwrap(), 1);
        assert_eq!(projects.get("1").await, Some(json!("core")));
    }

    #[test]
    fn test_default_ttls() {
        let manager = shared();
        assert_eq!(
            NamespacedCache::records(Arc::clone(&manager)).default_ttl(),
            Duration::from_secs(300)
        );
        assert_eq!(
            NamespacedCache::users(manager).default_ttl(),
            Duration::from_secs(3600)
        );
    }
}
