//! Domain models for the synchronization engine.
//!
//! Canonical definitions for the entities a sync pass works on:
//! - `Record`: unified cross-system issue representation
//! - `SyncOptions`: caller-supplied pass options, validated before use
//! - `Conflict`: a detected disagreement between two matched records
//! - `SyncResult`: the single value every pass returns

pub mod conflict;
pub mod error;
pub mod options;
pub mod record;
pub mod result;

pub use conflict::{
    Conflict, ConflictType, Resolution, ResolutionOutcome, ResolutionStrategy, Winner,
};
pub use error::{ConfigError, EventError, RemoteError, Result, SyncError, ValidationError};
pub use options::{
    SyncDirection, SyncFilters, SyncOptions, ValidatedOptions, MAX_BATCH_SIZE, MIN_BATCH_SIZE,
};
pub use record::{
    Record, RecordContent, RecordField, RecordId, RecordPatch, Side, DEPENDS_ON_KEY, XREF_KEY,
};
pub use result::{IssueKind, LowConfidenceMatch, MatchConfidence, SyncIssue, SyncResult};
