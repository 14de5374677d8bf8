//! Structured observability hooks for the sync pass lifecycle.
//!
//! - `pass_span`: span tagging everything a pass logs with its id
//! - `emit_*`: one `info!` line per lifecycle step, keyed by `event`

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Conflict, SyncResult, ValidatedOptions};

/// Pass-scoped span; every tracing call made while it is entered (or while
/// a future instrumented with it runs) carries `pass_id`.
///
/// ```ignore
/// run_pass(options).instrument(pass_span(pass_id)).await
/// ```
pub fn pass_span(pass_id: Uuid) -> tracing::Span {
    tracing::info_span!("tracksync.pass", pass_id = %pass_id)
}

pub fn emit_pass_started(pass_id: Uuid, options: &ValidatedOptions) {
    info!(
        event = "sync.started",
        pass_id = %pass_id,
        direction = %options.direction,
        dry_run = options.dry_run,
        force = options.force,
        batch_size = options.batch_size,
        since = ?options.since,
    );
}

pub fn emit_conflict_detected(pass_id: Uuid, conflict: &Conflict) {
    info!(
        event = "conflict.detected",
        pass_id = %pass_id,
        conflict_id = %conflict.id,
        kind = %conflict.conflict_type,
        source = %conflict.source.origin,
        target = %conflict.target.origin,
    );
}

pub fn emit_pass_finished(result: &SyncResult) {
    info!(
        event = "sync.finished",
        pass_id = %result.pass_id,
        success = result.success,
        changes = result.changes,
        conflicts = result.conflicts.len(),
        errors = result.errors.len(),
        duration_ms = result.duration_ms,
    );
}

/// Warning level: a sink rejected or panicked on an event.
pub fn emit_event_delivery_failed(pass_id: Uuid, event: &str, error: &dyn std::fmt::Display) {
    warn!(event = "sync.event_delivery_failed", pass_id = %pass_id, kind = %event, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_span_enter() {
        let _entered = pass_span(Uuid::new_v4()).entered();
    }
}
