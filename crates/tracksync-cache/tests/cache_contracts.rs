//! Behavioural contract tests for CacheManager across backends.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracksync_cache::{BackendKind, CacheConfig, CacheManager};

fn disk_config(dir: &tempfile::TempDir, backend: BackendKind) -> CacheConfig {
    CacheConfig {
        backend,
        capacity: 3,
        disk_root: dir.path().join("cache"),
        hybrid_threshold_bytes: 32,
        default_ttl_ms: None,
        ..CacheConfig::default()
    }
}

// ===========================================================================
// TTL
// ===========================================================================

#[tokio::test]
async fn ttl_entry_is_served_until_expiry() {
    let cache = CacheManager::in_memory(10, None).unwrap();
    cache.set("k", json!("v"), Some(Duration::from_millis(100))).await;

    assert_eq!(cache.get("k").await, Some(json!("v")));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(cache.get("k").await, None);
}

#[tokio::test]
async fn ttl_cleanup_pass_drops_size_by_one() {
    let cache = CacheManager::in_memory(10, None).unwrap();
    cache.set("keep", json!(1), None).await;
    cache
        .set("k", json!("v"), Some(Duration::from_millis(100)))
        .await;
    assert_eq!(cache.size().await, 2);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(cache.cleanup_expired().await, 1);
    assert_eq!(cache.size().await, 1);
    assert!(cache.has("keep").await);
}

#[tokio::test]
async fn ttl_default_applies_when_write_has_none() {
    let cache = CacheManager::in_memory(10, Some(Duration::from_millis(50))).unwrap();
    cache.set("k", json!(1), None).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(!cache.has("k").await);
}

#[tokio::test]
async fn ttl_is_honoured_by_disk_backend() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::from_config(&disk_config(&dir, BackendKind::Disk)).unwrap();
    cache
        .set("k", json!("v"), Some(Duration::from_millis(100)))
        .await;
    assert_eq!(cache.get("k").await, Some(json!("v")));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(cache.get("k").await, None);
    assert_eq!(cache.size().await, 0, "lazy expiry removes the file");
}

#[tokio::test]
async fn sweeper_removes_expired_entries_in_background() {
    let cache = Arc::new(CacheManager::in_memory(10, None).unwrap());
    cache
        .set("k", json!("v"), Some(Duration::from_millis(20)))
        .await;

    let sweeper = cache.spawn_sweeper(Duration::from_millis(30));
    tokio::time::sleep(Duration::from_millis(120)).await;
    sweeper.abort();

    assert_eq!(cache.size().await, 0);
}

// ===========================================================================
// LRU
// ===========================================================================

#[tokio::test]
async fn lru_evicts_least_recently_used() {
    let cache = CacheManager::in_memory(3, None).unwrap();
    cache.set("k1", json!(1), None).await;
    cache.set("k2", json!(2), None).await;
    cache.set("k3", json!(3), None).await;

    assert!(cache.get("k1").await.is_some());
    cache.set("k4", json!(4), None).await;

    let mut keys = cache.keys().await;
    keys.sort();
    assert_eq!(keys, vec!["k1", "k3", "k4"]);
    assert_eq!(cache.get("k2").await, None);
}

#[tokio::test]
async fn lru_eviction_never_fails_the_write() {
    let cache = CacheManager::in_memory(1, None).unwrap();
    for i in 0..100 {
        cache.set(&format!("k{i}"), json!(i), None).await;
    }
    assert_eq!(cache.size().await, 1);
    assert_eq!(cache.get("k99").await, Some(json!(99)));
}

// ===========================================================================
// Hybrid / snapshot
// ===========================================================================

#[tokio::test]
async fn hybrid_from_config_serves_small_and_large_values() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::from_config(&disk_config(&dir, BackendKind::Hybrid)).unwrap();
    assert_eq!(cache.backend_kind(), BackendKind::Hybrid);

    let large = json!("L".repeat(256));
    cache.set("small", json!(1), None).await;
    cache.set("large", large.clone(), None).await;

    assert_eq!(cache.get("small").await, Some(json!(1)));
    assert_eq!(cache.get("large").await, Some(large));
    assert_eq!(cache.size().await, 2);
}

#[tokio::test]
async fn snapshot_roundtrip_through_writer_warm_starts_new_cache() {
    let source = CacheManager::in_memory(10, None).unwrap();
    source.set("records:a:1", json!({"title": "one"}), None).await;
    source.set("records:a:2", json!({"title": "two"}), None).await;

    let mut buf = Vec::new();
    assert_eq!(source.export_to_writer(&mut buf).await.unwrap(), 2);

    let target = CacheManager::in_memory(10, None).unwrap();
    target.set("unrelated", json!(0), None).await;
    assert_eq!(target.import_from_reader(buf.as_slice()).await.unwrap(), 2);

    assert_eq!(target.get("records:a:2").await, Some(json!({"title": "two"})));
    assert!(!target.has("unrelated").await);
}

#[tokio::test]
async fn malformed_snapshot_is_rejected() {
    let cache = CacheManager::in_memory(10, None).unwrap();
    cache.set("k", json!(1), None).await;

    assert!(cache.import_from_reader(&b"not json"[..]).await.is_err());
    assert!(cache.has("k").await, "failed import leaves cache untouched");
}
