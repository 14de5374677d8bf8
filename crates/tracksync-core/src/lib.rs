//! Tracksync Core Library
//!
//! The synchronization engine: reconciles issue records held by two
//! independently-owned trackers.
//!
//! A pass (`SyncOrchestrator::execute_sync`) fetches both sides through the
//! `RemoteClient` contract, pairs records by cross-reference (or by title
//! under an explicit policy), classifies divergence with the
//! `ConflictDetector`, applies the configured `ConflictResolver` policy and
//! writes the outcome through the bounded-concurrency `BatchProcessor`.

pub mod batch;
pub mod config;
pub mod conflict;
pub mod domain;
pub mod fakes;
pub mod obs;
pub mod remote;
pub mod sync;
pub mod telemetry;

pub use batch::{
    BatchConfig, BatchFailure, BatchItemError, BatchOutcome, BatchProcessor, BatchSuccess,
    CancellationFlag,
};

pub use config::{EngineConfig, SyncSettings, ENV_PREFIX};

pub use conflict::{
    ConflictConfig, ConflictDetector, ConflictResolver, DependencyIndex, Detection, TieBreak,
};

pub use domain::{
    ConfigError, Conflict, ConflictType, EventError, IssueKind, LowConfidenceMatch,
    MatchConfidence, Record, RecordContent, RecordField, RecordId, RecordPatch, RemoteError,
    Resolution, ResolutionOutcome, ResolutionStrategy, Result, Side, SyncDirection, SyncError,
    SyncFilters, SyncIssue, SyncOptions, SyncResult, ValidatedOptions, ValidationError, Winner,
};

pub use remote::{CachedRemoteClient, RemoteClient, RemoteResult};

pub use sync::{
    EventSink, NoopEventSink, PassDescriptor, SyncEvent, SyncOrchestrator, SyncStatus,
    TitleMatchPolicy, TracingEventSink,
};

pub use tracksync_cache::{CacheConfig, CacheManager, NamespacedCache};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
