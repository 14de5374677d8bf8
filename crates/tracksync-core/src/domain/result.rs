//! The value every sync pass returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conflict::Conflict;
use super::record::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Validation,
    InProgress,
    Remote,
    /// A single write failed after exhausting retries.
    Apply,
    Event,
    Cancelled,
    Internal,
}

/// One entry of `SyncResult::errors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncIssue {
    pub kind: IssueKind,
    pub message: String,
    pub record: Option<RecordId>,
}

impl SyncIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            record: None,
        }
    }

    pub fn for_record(kind: IssueKind, message: impl Into<String>, record: RecordId) -> Self {
        Self {
            kind,
            message: message.into(),
            record: Some(record),
        }
    }
}

impl std::fmt::Display for SyncIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.record {
            Some(record) => write!(f, "{}: {}", record, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    /// Paired through a stored cross-reference.
    Exact,
    /// Paired by normalized title comparison.
    Heuristic,
}

/// A pair matched by title heuristics, surfaced for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowConfidenceMatch {
    pub a: RecordId,
    pub b: RecordId,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub pass_id: Uuid,
    pub dry_run: bool,
    /// `created + updated + deleted`.
    pub changes: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Cross-references written for newly matched pairs.
    pub linked: usize,
    /// Records left alone because their counterpart was outside this fetch.
    pub skipped: usize,
    /// Every conflict of the pass, resolved or not.
    pub conflicts: Vec<Conflict>,
    pub errors: Vec<SyncIssue>,
    pub low_confidence_matches: Vec<LowConfidenceMatch>,
    pub items_a: usize,
    pub items_b: usize,
    /// Writes applied to side A / side B.
    pub synced_a: usize,
    pub synced_b: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub message: String,
}

impl SyncResult {
    pub fn empty(pass_id: Uuid, started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            success: false,
            pass_id,
            dry_run,
            changes: 0,
            created: 0,
            updated: 0,
            deleted: 0,
            linked: 0,
            skipped: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
            low_confidence_matches: Vec::new(),
            items_a: 0,
            items_b: 0,
            synced_a: 0,
            synced_b: 0,
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            message: String::new(),
        }
    }

    /// A result that failed before any work happened.
    pub fn failed(issue: SyncIssue) -> Self {
        let now = Utc::now();
        let mut result = Self::empty(Uuid::new_v4(), now, false);
        result.message = issue.message.clone();
        result.errors.push(issue);
        result
    }

    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| !c.is_resolved())
    }

    /// Whether any error message contains `needle`.
    pub fn has_error_containing(&self, needle: &str) -> bool {
        self.errors.iter().any(|e| e.message.contains(needle))
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Utc::now();
        self.duration_ms = (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
    }
}
