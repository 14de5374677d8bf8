//! Pass lifecycle events and the sinks that receive them.
//!
//! The orchestrator owns one injected [`EventSink`]; the default is
//! [`NoopEventSink`]. Delivery failures never affect the pass outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::domain::{Conflict, EventError, SyncResult, ValidatedOptions};

pub const SYNC_STARTED: &str = "sync.started";
pub const SYNC_COMPLETED: &str = "sync.completed";
pub const SYNC_FAILED: &str = "sync.failed";
pub const CONFLICT_DETECTED: &str = "conflict.detected";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum SyncEvent {
    #[serde(rename = "sync.started")]
    Started {
        pass_id: Uuid,
        options: ValidatedOptions,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "conflict.detected")]
    ConflictDetected {
        pass_id: Uuid,
        conflict: Box<Conflict>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "sync.completed")]
    Completed {
        pass_id: Uuid,
        result: Box<SyncResult>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "sync.failed")]
    Failed {
        pass_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::Started { .. } => SYNC_STARTED,
            SyncEvent::ConflictDetected { .. } => CONFLICT_DETECTED,
            SyncEvent::Completed { .. } => SYNC_COMPLETED,
            SyncEvent::Failed { .. } => SYNC_FAILED,
        }
    }

    pub fn pass_id(&self) -> Uuid {
        match self {
            SyncEvent::Started { pass_id, .. }
            | SyncEvent::ConflictDetected { pass_id, .. }
            | SyncEvent::Completed { pass_id, .. }
            | SyncEvent::Failed { pass_id, .. } => *pass_id,
        }
    }
}

/// Receiver for lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &SyncEvent) -> Result<(), EventError>;
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn emit(&self, _event: &SyncEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// Forwards events to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: &SyncEvent) -> Result<(), EventError> {
        match event {
            SyncEvent::Started { pass_id, options, .. } => {
                info!(event = SYNC_STARTED, pass_id = %pass_id, direction = %options.direction, dry_run = options.dry_run)
            }
            SyncEvent::ConflictDetected { pass_id, conflict, .. } => {
                info!(event = CONFLICT_DETECTED, pass_id = %pass_id, kind = %conflict.conflict_type, reason = %conflict.reason)
            }
            SyncEvent::Completed { pass_id, result, .. } => {
                info!(event = SYNC_COMPLETED, pass_id = %pass_id, message = %result.message)
            }
            SyncEvent::Failed { pass_id, error, .. } => {
                info!(event = SYNC_FAILED, pass_id = %pass_id, error = %error)
            }
        }
        Ok(())
    }
}
