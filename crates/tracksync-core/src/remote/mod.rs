//! Remote tracker contract.
//!
//! The engine never talks to a tracker directly; it depends only on
//! [`RemoteClient`]. Concrete HTTP clients live with the embedder, in-memory
//! fakes live in [`crate::fakes`], and [`CachedRemoteClient`] wraps any client
//! with fetch-through caching.

pub mod cached;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Record, RecordPatch, RemoteError, SyncFilters};

pub use cached::CachedRemoteClient;

/// Result type for remote operations
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Typed operations on one tracker.
///
/// Guarantees expected of implementations:
/// - `fetch_records` returns records in a stable order and honours `filters`
///   and, when given, only returns records updated at or after `since`.
/// - Soft-deleted records are reported with `deleted = true`.
/// - `create_record` assigns the id and returns the stored record.
/// - Unreachable trackers fail with [`RemoteError::Unavailable`]; no data is
///   ever synthesised.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Stable system name used in record ids and cache keys.
    fn system(&self) -> &str;

    async fn fetch_records(
        &self,
        filters: &SyncFilters,
        since: Option<DateTime<Utc>>,
    ) -> RemoteResult<Vec<Record>>;

    async fn create_record(&self, record: &Record) -> RemoteResult<Record>;

    async fn update_record(&self, id: &str, patch: &RecordPatch) -> RemoteResult<Record>;

    async fn delete_record(&self, id: &str) -> RemoteResult<()>;
}

#[async_trait]
impl<T: RemoteClient + ?Sized> RemoteClient for Arc<T> {
    fn system(&self) -> &str {
        (**self).system()
    }

    async fn fetch_records(
        &self,
        filters: &SyncFilters,
        since: Option<DateTime<Utc>>,
    ) -> RemoteResult<Vec<Record>> {
        (**self).fetch_records(filters, since).await
    }

    async fn create_record(&self, record: &Record) -> RemoteResult<Record> {
        (**self).create_record(record).await
    }

    async fn update_record(&self, id: &str, patch: &RecordPatch) -> RemoteResult<Record> {
        (**self).update_record(id, patch).await
    }

    async fn delete_record(&self, id: &str) -> RemoteResult<()> {
        (**self).delete_record(id).await
    }
}

/// Run one remote call under a deadline.
///
/// An elapsed deadline becomes [`RemoteError::Timeout`], which the batch
/// processor retries like any other failure.
pub async fn with_timeout<T, F>(
    system: &str,
    operation: &str,
    timeout: Duration,
    call: F,
) -> RemoteResult<T>
where
    F: Future<Output = RemoteResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_elapsed) => Err(RemoteError::Timeout {
            system: system.to_string(),
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_through_fast_calls() {
        let out = with_timeout("a", "fetch_records", Duration::from_secs(1), async {
            Ok::<_, RemoteError>(7)
        })
        .await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn test_with_timeout_reports_operation() {
        let out: RemoteResult<()> =
            with_timeout("jira", "create_record", Duration::from_millis(5), async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        assert_eq!(
            out,
            Err(RemoteError::Timeout {
                system: "jira".to_string(),
                operation: "create_record".to_string(),
                timeout_ms: 5,
            })
        );
    }
}
