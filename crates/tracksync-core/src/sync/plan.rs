//! Direction strategies and the write operations a pass produces.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conflict::{ConflictDetector, DependencyIndex, Detection, DetectionContext};
use crate::domain::{
    Conflict, ConflictType, LowConfidenceMatch, MatchConfidence, Record, RecordContent, RecordId,
    RecordPatch, Side, SyncDirection,
};
use crate::sync::matcher::{MatchOutcome, MatchedPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Create,
    Update,
    Delete,
    Link,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Create => "create",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
            OpKind::Link => "link",
        }
    }

    /// Links only touch metadata and never count as a change.
    pub fn is_change(&self) -> bool {
        !matches!(self, OpKind::Link)
    }
}

/// One write against one side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum SyncOp {
    /// Create a counterpart of `origin` on `target` carrying `content`, then
    /// link `origin` back to it. `depends_on` holds ids on `target`.
    Create {
        target: Side,
        origin: Record,
        content: RecordContent,
        #[serde(default)]
        depends_on: Vec<String>,
    },
    Update {
        target: Side,
        record: RecordId,
        patch: RecordPatch,
    },
    Delete {
        target: Side,
        record: RecordId,
    },
    /// Write the cross-reference `counterpart_id` into `record`.
    Link {
        target: Side,
        record: RecordId,
        counterpart_id: String,
    },
}

impl SyncOp {
    pub fn kind(&self) -> OpKind {
        match self {
            SyncOp::Create { .. } => OpKind::Create,
            SyncOp::Update { .. } => OpKind::Update,
            SyncOp::Delete { .. } => OpKind::Delete,
            SyncOp::Link { .. } => OpKind::Link,
        }
    }

    pub fn target(&self) -> Side {
        match self {
            SyncOp::Create { target, .. }
            | SyncOp::Update { target, .. }
            | SyncOp::Delete { target, .. }
            | SyncOp::Link { target, .. } => *target,
        }
    }

    /// Record an error about this op should name; the origin for creates.
    pub fn record(&self) -> &RecordId {
        match self {
            SyncOp::Create { origin, .. } => &origin.origin,
            SyncOp::Update { record, .. }
            | SyncOp::Delete { record, .. }
            | SyncOp::Link { record, .. } => record,
        }
    }
}

/// Which side is the source of truth and which sides receive content.
///
/// `a-to-b` and `b-to-a` only ever write content to their target side; the
/// source side receives nothing but cross-reference links. Bidirectional is
/// the union of both one-way strategies, with each matched pair diffed once
/// using A as the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionStrategy {
    direction: SyncDirection,
}

impl DirectionStrategy {
    pub fn new(direction: SyncDirection) -> Self {
        Self { direction }
    }

    pub fn direction(&self) -> SyncDirection {
        self.direction
    }

    pub fn source_side(&self) -> Side {
        match self.direction {
            SyncDirection::BToA => Side::B,
            SyncDirection::AToB | SyncDirection::Bidirectional => Side::A,
        }
    }

    pub fn writes_to(&self, side: Side) -> bool {
        match self.direction {
            SyncDirection::Bidirectional => true,
            SyncDirection::AToB => side == Side::B,
            SyncDirection::BToA => side == Side::A,
        }
    }
}

/// Cross-side id pairs known in one pass, from matches and stored
/// references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterpartIndex {
    a_to_b: HashMap<String, String>,
    b_to_a: HashMap<String, String>,
}

impl CounterpartIndex {
    pub fn from_outcome(matched: &MatchOutcome) -> Self {
        let mut index = Self::default();
        for pair in &matched.pairs {
            index.insert(pair.a.id(), pair.b.id());
        }
        for record in &matched.linked_elsewhere_a {
            if let Some(xref) = record.xref() {
                index.insert(record.id(), xref);
            }
        }
        for record in &matched.linked_elsewhere_b {
            if let Some(xref) = record.xref() {
                index.insert(xref, record.id());
            }
        }
        index
    }

    fn insert(&mut self, a_id: &str, b_id: &str) {
        self.a_to_b
            .entry(a_id.to_string())
            .or_insert_with(|| b_id.to_string());
        self.b_to_a
            .entry(b_id.to_string())
            .or_insert_with(|| a_id.to_string());
    }

    /// Register a counterpart created during the pass.
    pub fn record_created(&mut self, origin_side: Side, origin_id: &str, created_id: &str) {
        match origin_side {
            Side::A => self.insert(origin_id, created_id),
            Side::B => self.insert(created_id, origin_id),
        }
    }

    /// Id on the other side of the record `id` held by `side`.
    pub fn counterpart(&self, side: Side, id: &str) -> Option<&str> {
        match side {
            Side::A => self.a_to_b.get(id),
            Side::B => self.b_to_a.get(id),
        }
        .map(String::as_str)
    }

    /// Dependencies of `record` (held by `side`) as ids on the other side.
    /// A dependency with no known counterpart is dropped.
    pub fn translate_dependencies(&self, side: Side, record: &Record) -> Vec<String> {
        record
            .depends_on()
            .iter()
            .filter_map(|id| self.counterpart(side, id))
            .map(str::to_string)
            .collect()
    }
}

/// Output of the diff phase; conflicts are still unresolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub ops: Vec<SyncOp>,
    pub conflicts: Vec<Conflict>,
    pub skipped: usize,
    pub low_confidence: Vec<LowConfidenceMatch>,
    pub counterparts: CounterpartIndex,
}

pub struct Planner<'a> {
    strategy: DirectionStrategy,
    since: Option<DateTime<Utc>>,
    detector: &'a ConflictDetector,
}

impl<'a> Planner<'a> {
    pub fn new(
        direction: SyncDirection,
        since: Option<DateTime<Utc>>,
        detector: &'a ConflictDetector,
    ) -> Self {
        Self {
            strategy: DirectionStrategy::new(direction),
            since,
            detector,
        }
    }

    pub fn strategy(&self) -> DirectionStrategy {
        self.strategy
    }

    pub fn plan(
        &self,
        matched: MatchOutcome,
        deps_a: &DependencyIndex,
        deps_b: &DependencyIndex,
    ) -> Plan {
        let mut plan = Plan {
            skipped: matched.linked_elsewhere_count(),
            counterparts: CounterpartIndex::from_outcome(&matched),
            ..Plan::default()
        };

        for pair in &matched.pairs {
            self.plan_pair(pair, deps_a, deps_b, &mut plan);
        }
        for record in matched.unmatched_a {
            self.plan_create(Side::A, record, &mut plan);
        }
        for record in matched.unmatched_b {
            self.plan_create(Side::B, record, &mut plan);
        }
        plan
    }

    fn plan_pair(
        &self,
        pair: &MatchedPair,
        deps_a: &DependencyIndex,
        deps_b: &DependencyIndex,
        plan: &mut Plan,
    ) {
        if pair.confidence == MatchConfidence::Heuristic {
            plan.low_confidence.push(LowConfidenceMatch {
                a: pair.a.origin.clone(),
                b: pair.b.origin.clone(),
                similarity: pair.similarity,
            });
        }
        if !pair.a_linked() && !pair.a.deleted {
            plan.ops.push(SyncOp::Link {
                target: Side::A,
                record: pair.a.origin.clone(),
                counterpart_id: pair.b.id().to_string(),
            });
        }
        if !pair.b_linked() && !pair.b.deleted {
            plan.ops.push(SyncOp::Link {
                target: Side::B,
                record: pair.b.origin.clone(),
                counterpart_id: pair.a.id().to_string(),
            });
        }

        let source_side = self.strategy.source_side();
        let (source, target, source_deps) = match source_side {
            Side::A => (&pair.a, &pair.b, deps_a),
            Side::B => (&pair.b, &pair.a, deps_b),
        };
        let ctx = DetectionContext {
            since: self.since,
            source_deps,
        };

        match self.detector.detect(source_side, source, target, &ctx) {
            Detection::InSync => {}
            Detection::PropagateDelete { deleted } => {
                let live = if deleted == Side::A { &pair.b } else { &pair.a };
                if self.strategy.writes_to(deleted.other()) {
                    plan.ops.push(SyncOp::Delete {
                        target: deleted.other(),
                        record: live.origin.clone(),
                    });
                } else {
                    plan.skipped += 1;
                }
            }
            Detection::PropagateUpdate { from } => {
                let (changed, stale) = if from == Side::A {
                    (&pair.a, &pair.b)
                } else {
                    (&pair.b, &pair.a)
                };
                let patch = RecordPatch::between(&stale.content(), &changed.content());
                if !self.strategy.writes_to(from.other()) {
                    plan.skipped += 1;
                } else if patch.has_content_changes() {
                    plan.ops.push(SyncOp::Update {
                        target: from.other(),
                        record: stale.origin.clone(),
                        patch,
                    });
                }
            }
            Detection::Conflict(conflict) => plan.conflicts.push(*conflict),
        }
    }

    fn plan_create(&self, side: Side, record: Record, plan: &mut Plan) {
        if record.deleted || !self.strategy.writes_to(side.other()) {
            plan.skipped += 1;
            return;
        }
        let content = record.content();
        let depends_on = plan.counterparts.translate_dependencies(side, &record);
        plan.ops.push(SyncOp::Create {
            target: side.other(),
            origin: record,
            content,
            depends_on,
        });
    }

    /// Writes implied by a resolved conflict. Unresolved conflicts and
    /// timestamp conflicts produce none.
    pub fn resolution_ops(&self, conflict: &Conflict, counterparts: &CounterpartIndex) -> Vec<SyncOp> {
        let Some(resolution) = &conflict.resolution else {
            return Vec::new();
        };
        let outcome = &resolution.outcome;
        let source_side = conflict.source_side;
        let target_side = conflict.target_side();
        let mut ops = Vec::new();

        match conflict.conflict_type {
            ConflictType::Timestamp => {}
            ConflictType::Deletion => {
                let (deleted_side, live) = if conflict.source.deleted {
                    (source_side, &conflict.target)
                } else {
                    (target_side, &conflict.source)
                };
                if outcome.deleted {
                    if self.strategy.writes_to(deleted_side.other()) {
                        ops.push(SyncOp::Delete {
                            target: deleted_side.other(),
                            record: live.origin.clone(),
                        });
                    }
                } else if self.strategy.writes_to(deleted_side) {
                    ops.push(SyncOp::Create {
                        target: deleted_side,
                        origin: live.clone(),
                        content: outcome.content.clone(),
                        depends_on: counterparts.translate_dependencies(deleted_side.other(), live),
                    });
                }
            }
            ConflictType::Data | ConflictType::Dependency => {
                for (side, record) in [
                    (source_side, &conflict.source),
                    (target_side, &conflict.target),
                ] {
                    if !self.strategy.writes_to(side) {
                        continue;
                    }
                    let patch = RecordPatch::between(&record.content(), &outcome.content);
                    if patch.has_content_changes() {
                        ops.push(SyncOp::Update {
                            target: side,
                            record: record.origin.clone(),
                            patch,
                        });
                    }
                }
            }
        }
        ops
    }
}
