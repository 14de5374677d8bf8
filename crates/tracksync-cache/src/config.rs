//! Cache configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Which storage tier backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Disk,
    Hybrid,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendKind::Memory => "memory",
            BackendKind::Disk => "disk",
            BackendKind::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> CacheResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "disk" => Ok(BackendKind::Disk),
            "hybrid" => Ok(BackendKind::Hybrid),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown cache backend '{other}' (expected memory, disk or hybrid)"
            ))),
        }
    }
}

/// Cache settings, consumed by [`CacheManager::from_config`](crate::CacheManager::from_config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: BackendKind,
    /// Maximum entry count of the memory tier.
    pub capacity: usize,
    /// Root directory of the disk tier. Created on demand.
    pub disk_root: PathBuf,
    /// Byte budget of the disk tier.
    pub disk_max_bytes: u64,
    /// Hybrid backend: values up to this size stay in memory.
    pub hybrid_threshold_bytes: usize,
    /// TTL applied when a write does not specify one. `None` = no expiry.
    pub default_ttl_ms: Option<u64>,
    /// Interval of the background expiry sweep.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            capacity: 1_000,
            disk_root: PathBuf::from(".tracksync/cache"),
            disk_max_bytes: 64 * 1024 * 1024,
            hybrid_threshold_bytes: 16 * 1024,
            default_ttl_ms: Some(300_000),
            sweep_interval_ms: 60_000,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_ms.map(Duration::from_millis)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Reject values the backends cannot honour.
    pub fn validate(&self) -> CacheResult<()> {
        if self.capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "capacity must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "sweep_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.backend != BackendKind::Memory && self.disk_max_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "disk_max_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
