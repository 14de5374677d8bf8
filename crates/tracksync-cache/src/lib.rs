//! Tracksync-Cache: multi-tier cache for remote tracker calls
//!
//! Shields both remote trackers from redundant fetches during and across
//! sync passes.
//!
//! ## Layer 0 - Caching
//!
//! Focus: bounded memory, TTL correctness, silent degradation on I/O failure.
//!
//! ## Key Components
//!
//! - `CacheManager`: TTL, statistics, fetch-through, pattern invalidation, snapshots
//! - `CacheBackend`: pluggable storage (`MemoryBackend`, `DiskBackend`, `HybridBackend`)
//! - `NamespacedCache`: fixed key prefix + domain default TTL

pub mod backend;
pub mod config;
pub mod disk;
mod entry;
mod error;
pub mod hybrid;
pub mod manager;
pub mod memory;
pub mod namespaced;

pub use backend::CacheBackend;
pub use config::{BackendKind, CacheConfig};
pub use disk::DiskBackend;
pub use entry::CacheEntry;
pub use error::{CacheError, CacheResult};
pub use hybrid::HybridBackend;
pub use manager::{CacheManager, CacheSnapshot, CacheStats};
pub use memory::MemoryBackend;
pub use namespaced::NamespacedCache;
