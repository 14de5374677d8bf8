//! Conflict and resolution audit types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::{Record, RecordContent, RecordField, Side};

/// Kinds of disagreement, most severe first in [`ConflictType::severity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    Data,
    Timestamp,
    Deletion,
    Dependency,
}

impl ConflictType {
    /// Higher wins when several kinds apply to one pair.
    pub fn severity(&self) -> u8 {
        match self {
            ConflictType::Deletion => 3,
            ConflictType::Dependency => 2,
            ConflictType::Timestamp => 1,
            ConflictType::Data => 0,
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConflictType::Data => "data",
            ConflictType::Timestamp => "timestamp",
            ConflictType::Deletion => "deletion",
            ConflictType::Dependency => "dependency",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Queue for a human; reported unresolved.
    Manual,
    SourceWins,
    TargetWins,
    /// Later `updated_at` wins; ties go to the configured side.
    NewerWins,
    /// Union labels, keep one-sided values, newer-wins for the rest.
    Merge,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::Manual => "manual",
            ResolutionStrategy::SourceWins => "source-wins",
            ResolutionStrategy::TargetWins => "target-wins",
            ResolutionStrategy::NewerWins => "newer-wins",
            ResolutionStrategy::Merge => "merge",
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(ResolutionStrategy::Manual),
            "source-wins" => Ok(ResolutionStrategy::SourceWins),
            "target-wins" => Ok(ResolutionStrategy::TargetWins),
            "newer-wins" => Ok(ResolutionStrategy::NewerWins),
            "merge" => Ok(ResolutionStrategy::Merge),
            other => Err(format!("unknown resolution strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Source,
    Target,
    Merged,
}

/// The state both sides should converge to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub winner: Winner,
    pub content: RecordContent,
    /// Both sides should end up deleted.
    pub deleted: bool,
}

/// Audit entry attached to a resolved conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub strategy: ResolutionStrategy,
    /// `"policy"` for the pass strategy, `"force"` for forced passes.
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
    pub outcome: ResolutionOutcome,
}

/// A detected disagreement between two matched records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: Uuid,
    pub conflict_type: ConflictType,
    /// Side `source` was fetched from.
    pub source_side: Side,
    pub source: Record,
    pub target: Record,
    /// First divergent field, when any.
    pub field: Option<RecordField>,
    /// Every divergent field.
    pub fields: Vec<RecordField>,
    /// Why the detector classified the pair this way.
    pub reason: String,
    pub resolution: Option<Resolution>,
}

impl Conflict {
    pub fn new(
        conflict_type: ConflictType,
        source_side: Side,
        source: Record,
        target: Record,
        fields: Vec<RecordField>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conflict_type,
            source_side,
            source,
            target,
            field: fields.first().copied(),
            fields,
            reason: reason.into(),
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    pub fn target_side(&self) -> Side {
        self.source_side.other()
    }
}
