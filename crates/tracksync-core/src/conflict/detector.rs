//! Classification of matched pairs.
//!
//! Checks run in severity order and the first hit wins:
//! deletion > dependency > timestamp > data. A record counts as modified
//! since the last sync when `updated_at >= since`, the same inclusive bound
//! a tracker applies when fetching with a cursor.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::domain::{Conflict, ConflictType, Record, RecordField, Side};

/// Dependency graph of one side's live fetched records.
///
/// An index built from a narrowed fetch (filters or a `since` cursor) is
/// partial: an id outside it is unknown, not missing.
#[derive(Debug, Clone)]
pub struct DependencyIndex {
    deps: HashMap<String, Vec<String>>,
    complete: bool,
}

impl Default for DependencyIndex {
    fn default() -> Self {
        Self {
            deps: HashMap::new(),
            complete: true,
        }
    }
}

impl DependencyIndex {
    /// Index of a full fetch.
    pub fn from_records(records: &[Record]) -> Self {
        let deps = records
            .iter()
            .filter(|r| !r.deleted)
            .map(|r| (r.id().to_string(), r.depends_on()))
            .collect();
        Self {
            deps,
            complete: true,
        }
    }

    /// Index of a fetch that may have left records out.
    pub fn partial(records: &[Record]) -> Self {
        Self {
            complete: false,
            ..Self::from_records(records)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn contains(&self, id: &str) -> bool {
        self.deps.contains_key(id)
    }

    /// Dependencies of `record` that do not exist among the live records.
    /// Always empty for a partial index.
    pub fn missing(&self, record: &Record) -> Vec<String> {
        if !self.complete {
            return Vec::new();
        }
        record
            .depends_on()
            .into_iter()
            .filter(|id| !self.contains(id))
            .collect()
    }

    /// First dependency cycle reachable from `start`, as a closed path.
    pub fn cycle_from(&self, start: &str) -> Option<Vec<String>> {
        let mut done: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = Vec::new();
        self.visit(start, &mut path, &mut done)
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        path: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|n| *n == node) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if done.contains(node) {
            return None;
        }
        path.push(node);
        if let Some(children) = self.deps.get(node) {
            for child in children {
                if let Some(cycle) = self.visit(child, path, done) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        done.insert(node);
        None
    }
}

/// Inputs shared by every pair in one pass.
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    /// Last successful sync; `None` means unknown.
    pub since: Option<DateTime<Utc>>,
    /// Dependency graph of the source side.
    pub source_deps: &'a DependencyIndex,
}

impl DetectionContext<'_> {
    /// Unknown last sync counts as modified.
    pub fn modified_since(&self, record: &Record) -> bool {
        self.since.map_or(true, |since| record.updated_at >= since)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    InSync,
    /// One side is tombstoned and the live side was untouched since the last
    /// sync: the deletion simply carries over.
    PropagateDelete { deleted: Side },
    /// Content differs but only `from` was modified since a known last
    /// sync: its content carries over to the other side.
    PropagateUpdate { from: Side },
    Conflict(Box<Conflict>),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(
        &self,
        source_side: Side,
        source: &Record,
        target: &Record,
        ctx: &DetectionContext<'_>,
    ) -> Detection {
        let conflict = |kind, fields: Vec<RecordField>, reason: String| {
            Detection::Conflict(Box::new(Conflict::new(
                kind,
                source_side,
                source.clone(),
                target.clone(),
                fields,
                reason,
            )))
        };

        match (source.deleted, target.deleted) {
            (true, true) => return Detection::InSync,
            (true, false) | (false, true) => {
                let (deleted_side, deleted, live) = if source.deleted {
                    (source_side, source, target)
                } else {
                    (source_side.other(), target, source)
                };
                if ctx.modified_since(live) {
                    return conflict(
                        ConflictType::Deletion,
                        Vec::new(),
                        format!(
                            "{} was deleted but {} was modified since last sync",
                            deleted.origin, live.origin
                        ),
                    );
                }
                return Detection::PropagateDelete {
                    deleted: deleted_side,
                };
            }
            (false, false) => {}
        }

        let fields = source.content().diff(&target.content());
        let both_modified =
            ctx.since.is_some() && ctx.modified_since(source) && ctx.modified_since(target);
        if fields.is_empty() && !both_modified {
            return Detection::InSync;
        }

        let missing = ctx.source_deps.missing(source);
        if !missing.is_empty() {
            return conflict(
                ConflictType::Dependency,
                fields,
                format!(
                    "{} depends on records not present: {}",
                    source.origin,
                    missing.join(", ")
                ),
            );
        }
        if let Some(cycle) = ctx.source_deps.cycle_from(source.id()) {
            return conflict(
                ConflictType::Dependency,
                fields,
                format!("dependency cycle: {}", cycle.join(" -> ")),
            );
        }

        if !fields.is_empty() && ctx.since.is_some() {
            match (ctx.modified_since(source), ctx.modified_since(target)) {
                (true, false) => return Detection::PropagateUpdate { from: source_side },
                (false, true) => {
                    return Detection::PropagateUpdate {
                        from: source_side.other(),
                    }
                }
                _ => {}
            }
        }

        if fields.is_empty() {
            return conflict(
                ConflictType::Timestamp,
                fields,
                "both sides modified since last sync with identical content".to_string(),
            );
        }

        let names: Vec<&str> = fields.iter().map(RecordField::as_str).collect();
        let reason = format!("fields differ: {}", names.join(", "));
        conflict(ConflictType::Data, fields, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn detect(source: &Record, target: &Record, since: Option<DateTime<Utc>>) -> Detection {
        let deps = DependencyIndex::from_records(std::slice::from_ref(source));
        ConflictDetector::new().detect(
            Side::A,
            source,
            target,
            &DetectionContext {
                since,
                source_deps: &deps,
            },
        )
    }

    fn kind(d: &Detection) -> Option<ConflictType> {
        match d {
            Detection::Conflict(c) => Some(c.conflict_type),
            _ => None,
        }
    }

    #[test]
    fn test_identical_pair_is_in_sync() {
        let a = Record::new("a", "1", "same");
        let b = Record::new("b", "2", "same");
        assert_eq!(detect(&a, &b, None), Detection::InSync);
    }

    #[test]
    fn test_deleted_vs_modified_is_deletion_not_data() {
        let last_sync = Utc::now() - Duration::hours(1);
        let a = Record::new("a", "1", "Fix login bug")
            .with_updated_at(last_sync - Duration::hours(1))
            .tombstone();
        let b = Record::new("b", "2", "Fix login bug (edited)");

        let d = detect(&a, &b, Some(last_sync));
        assert_eq!(kind(&d), Some(ConflictType::Deletion));
    }

    #[test]
    fn test_deleted_vs_untouched_propagates() {
        let last_sync = Utc::now() - Duration::minutes(10);
        let a = Record::new("a", "1", "t").tombstone();
        let b = Record::new("b", "2", "t").with_updated_at(last_sync - Duration::days(1));

        assert_eq!(
            detect(&a, &b, Some(last_sync)),
            Detection::PropagateDelete { deleted: Side::A }
        );
        assert_eq!(
            detect(&b, &a, Some(last_sync)),
            Detection::PropagateDelete { deleted: Side::B }
        );
    }

    #[test]
    fn test_unknown_since_treats_live_side_as_modified() {
        let a = Record::new("a", "1", "t").tombstone();
        let b = Record::new("b", "2", "t");
        assert_eq!(kind(&detect(&a, &b, None)), Some(ConflictType::Deletion));
    }

    #[test]
    fn test_both_modified_same_content_is_timestamp() {
        let last_sync = Utc::now() - Duration::minutes(5);
        let a = Record::new("a", "1", "same");
        let b = Record::new("b", "2", "same");
        assert_eq!(
            kind(&detect(&a, &b, Some(last_sync))),
            Some(ConflictType::Timestamp)
        );
        assert_eq!(detect(&a, &b, None), Detection::InSync);
    }

    #[test]
    fn test_field_mismatch_is_data_with_all_fields() {
        let a = Record::new("a", "1", "title").with_priority("high");
        let b = Record::new("b", "2", "title").with_status("closed");
        match detect(&a, &b, None) {
            Detection::Conflict(c) => {
                assert_eq!(c.conflict_type, ConflictType::Data);
                assert_eq!(c.fields, vec![RecordField::Status, RecordField::Priority]);
                assert_eq!(c.field, Some(RecordField::Status));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_dependency_outranks_data() {
        let a = Record::new("a", "1", "x").with_dependencies(["404"]);
        let b = Record::new("b", "2", "y");
        assert_eq!(kind(&detect(&a, &b, None)), Some(ConflictType::Dependency));
    }

    #[test]
    fn test_dependency_cycle_detected() {
        let records = vec![
            Record::new("a", "1", "x").with_dependencies(["2"]),
            Record::new("a", "2", "y").with_dependencies(["3"]),
            Record::new("a", "3", "z").with_dependencies(["1"]),
        ];
        let index = DependencyIndex::from_records(&records);
        assert_eq!(
            index.cycle_from("1"),
            Some(vec![
                "1".to_string(),
                "2".to_string(),
                "3".to_string(),
                "1".to_string()
            ])
        );

        let ctx = DetectionContext {
            since: None,
            source_deps: &index,
        };
        let target = Record::new("b", "9", "changed");
        let d = ConflictDetector::new().detect(Side::A, &records[0], &target, &ctx);
        assert_eq!(kind(&d), Some(ConflictType::Dependency));
    }

    #[test]
    fn test_acyclic_diamond_is_not_a_cycle() {
        let records = vec![
            Record::new("a", "1", "x").with_dependencies(["2", "3"]),
            Record::new("a", "2", "y").with_dependencies(["4"]),
            Record::new("a", "3", "z").with_dependencies(["4"]),
            Record::new("a", "4", "w"),
        ];
        let index = DependencyIndex::from_records(&records);
        assert_eq!(index.cycle_from("1"), None);
        assert!(index.missing(&records[0]).is_empty());
    }

    #[test]
    fn test_partial_index_never_reports_missing() {
        let records = vec![Record::new("a", "1", "x").with_dependencies(["0"])];
        let full = DependencyIndex::from_records(&records);
        let partial = DependencyIndex::partial(&records);

        assert_eq!(full.missing(&records[0]), vec!["0".to_string()]);
        assert!(partial.missing(&records[0]).is_empty());
        assert!(!partial.is_complete());

        let ctx = DetectionContext {
            since: None,
            source_deps: &partial,
        };
        let target = Record::new("b", "9", "y");
        let d = ConflictDetector::new().detect(Side::A, &records[0], &target, &ctx);
        assert_eq!(kind(&d), Some(ConflictType::Data));
    }

    #[test]
    fn test_partial_index_still_finds_cycles() {
        let records = vec![
            Record::new("a", "1", "x").with_dependencies(["2", "outside"]),
            Record::new("a", "2", "y").with_dependencies(["1"]),
        ];
        let index = DependencyIndex::partial(&records);
        assert!(index.cycle_from("1").is_some());
    }

    #[test]
    fn test_one_sided_edit_propagates_instead_of_conflicting() {
        let last_sync = Utc::now() - Duration::hours(1);
        let edited = Record::new("a", "1", "child edited");
        let stale = Record::new("b", "2", "child").with_updated_at(last_sync - Duration::days(2));

        assert_eq!(
            detect(&edited, &stale, Some(last_sync)),
            Detection::PropagateUpdate { from: Side::A }
        );
        assert_eq!(
            detect(&stale, &edited, Some(last_sync)),
            Detection::PropagateUpdate { from: Side::B }
        );
        // Without a cursor nothing is known about who changed.
        assert_eq!(kind(&detect(&edited, &stale, None)), Some(ConflictType::Data));
    }

    #[test]
    fn test_update_exactly_at_since_counts_as_modified() {
        let last_sync = Utc::now() - Duration::hours(1);
        let deps = DependencyIndex::default();
        let ctx = DetectionContext {
            since: Some(last_sync),
            source_deps: &deps,
        };
        let at = Record::new("a", "1", "t").with_updated_at(last_sync);
        let before = Record::new("a", "2", "t")
            .with_updated_at(last_sync - Duration::milliseconds(1));

        assert!(ctx.modified_since(&at));
        assert!(!ctx.modified_since(&before));
    }
}
