//! Applying a resolution policy to detected conflicts.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{
    Conflict, ConflictType, Record, RecordContent, Resolution, ResolutionOutcome,
    ResolutionStrategy, Winner,
};

/// Side favoured by `newer-wins` when both timestamps are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    #[default]
    Source,
    Target,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Strategy applied to every conflict of a normal pass.
    pub strategy: ResolutionStrategy,
    /// Strategy applied to every conflict when the pass is forced.
    pub default_strategy: ResolutionStrategy,
    pub tie_break: TieBreak,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            strategy: ResolutionStrategy::Manual,
            default_strategy: ResolutionStrategy::NewerWins,
            tie_break: TieBreak::Source,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    config: ConflictConfig,
}

impl ConflictResolver {
    pub fn new(config: ConflictConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConflictConfig {
        &self.config
    }

    /// Strategy in effect for a pass.
    pub fn strategy_for(&self, force: bool) -> ResolutionStrategy {
        if force {
            self.config.default_strategy
        } else {
            self.config.strategy
        }
    }

    /// Resolve `conflict` in place. Returns `false` when it stays queued for
    /// a human: under `manual`, or for dependency conflicts outside a forced
    /// pass.
    pub fn resolve(&self, conflict: &mut Conflict, force: bool) -> bool {
        if conflict.is_resolved() {
            return true;
        }
        let strategy = self.strategy_for(force);
        if strategy == ResolutionStrategy::Manual {
            return false;
        }
        if conflict.conflict_type == ConflictType::Dependency && !force {
            return false;
        }

        let outcome = match conflict.conflict_type {
            ConflictType::Deletion => self.resolve_deletion(conflict, strategy),
            _ => self.resolve_content(conflict, strategy),
        };
        debug!(
            conflict_id = %conflict.id,
            kind = %conflict.conflict_type,
            strategy = %strategy,
            winner = ?outcome.winner,
            "conflict resolved"
        );
        conflict.resolution = Some(Resolution {
            strategy,
            resolved_by: if force { "force" } else { "policy" }.to_string(),
            resolved_at: Utc::now(),
            outcome,
        });
        true
    }

    fn newer(&self, source: &Record, target: &Record) -> Winner {
        match source.updated_at.cmp(&target.updated_at) {
            std::cmp::Ordering::Greater => Winner::Source,
            std::cmp::Ordering::Less => Winner::Target,
            std::cmp::Ordering::Equal => match self.config.tie_break {
                TieBreak::Source => Winner::Source,
                TieBreak::Target => Winner::Target,
            },
        }
    }

    fn pick(conflict: &Conflict, winner: Winner) -> ResolutionOutcome {
        let record = match winner {
            Winner::Target => &conflict.target,
            _ => &conflict.source,
        };
        ResolutionOutcome {
            winner,
            content: record.content(),
            deleted: record.deleted,
        }
    }

    fn resolve_deletion(&self, conflict: &Conflict, strategy: ResolutionStrategy) -> ResolutionOutcome {
        let winner = match strategy {
            ResolutionStrategy::SourceWins => Winner::Source,
            ResolutionStrategy::TargetWins => Winner::Target,
            // Nothing to merge with a tombstone.
            _ => self.newer(&conflict.source, &conflict.target),
        };
        Self::pick(conflict, winner)
    }

    fn resolve_content(&self, conflict: &Conflict, strategy: ResolutionStrategy) -> ResolutionOutcome {
        let (source, target) = (&conflict.source, &conflict.target);
        match strategy {
            ResolutionStrategy::SourceWins => Self::pick(conflict, Winner::Source),
            ResolutionStrategy::TargetWins => Self::pick(conflict, Winner::Target),
            ResolutionStrategy::Merge => ResolutionOutcome {
                winner: Winner::Merged,
                content: merge_content(
                    &source.content(),
                    &target.content(),
                    self.newer(source, target) != Winner::Target,
                ),
                deleted: false,
            },
            _ => Self::pick(conflict, self.newer(source, target)),
        }
    }
}

/// Field-wise merge: labels are unioned, a value present on only one side is
/// kept, and anything set differently on both sides comes from the newer
/// record.
pub fn merge_content(source: &RecordContent, target: &RecordContent, source_newer: bool) -> RecordContent {
    fn scalar(s: &str, t: &str, source_newer: bool) -> String {
        match (s.is_empty(), t.is_empty()) {
            (false, true) => s.to_string(),
            (true, false) => t.to_string(),
            _ if source_newer => s.to_string(),
            _ => t.to_string(),
        }
    }
    fn optional(s: &Option<String>, t: &Option<String>, source_newer: bool) -> Option<String> {
        match (s, t) {
            (Some(_), None) => s.clone(),
            (None, Some(_)) => t.clone(),
            _ if source_newer => s.clone(),
            _ => t.clone(),
        }
    }

    RecordContent {
        title: scalar(&source.title, &target.title, source_newer),
        body: scalar(&source.body, &target.body, source_newer),
        status: scalar(&source.status, &target.status, source_newer),
        priority: optional(&source.priority, &target.priority, source_newer),
        labels: source.labels.union(&target.labels).cloned().collect(),
        assignee: optional(&source.assignee, &target.assignee, source_newer),
    }
}
