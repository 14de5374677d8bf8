use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single cached value with its absolute expiry.
///
/// Expiry is computed once at write time; entries never extend their
/// lifetime on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    /// `None` means the entry never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Serialized size of `value` in bytes.
    pub size: usize,
}

impl CacheEntry {
    /// Build an entry written now, expiring `ttl` from now.
    pub fn new(key: impl Into<String>, value: Value, ttl: Option<Duration>) -> Self {
        let created_at = Utc::now();
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|d| created_at.checked_add_signed(d))
        });
        let size = serde_json::to_vec(&value).map(|b| b.len()).unwrap_or(0);
        Self {
            key: key.into(),
            value,
            created_at,
            expires_at,
            size,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
