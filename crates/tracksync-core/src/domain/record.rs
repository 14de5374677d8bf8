//! Unified cross-system record.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata key holding the counterpart's origin id once two records are linked.
pub const XREF_KEY: &str = "tracksync.xref";

/// Metadata key holding an array of same-side origin ids this record depends on.
pub const DEPENDS_ON_KEY: &str = "tracksync.depends_on";

/// One of the two trackers being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::A => f.write_str("a"),
            Side::B => f.write_str("b"),
        }
    }
}

/// Stable identity: origin system plus the id that system assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    pub system: String,
    pub id: String,
}

impl RecordId {
    pub fn new(system: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.system, self.id)
    }
}

/// Content fields compared between matched records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordField {
    Title,
    Body,
    Status,
    Priority,
    Labels,
    Assignee,
}

impl RecordField {
    pub const ALL: [RecordField; 6] = [
        RecordField::Title,
        RecordField::Body,
        RecordField::Status,
        RecordField::Priority,
        RecordField::Labels,
        RecordField::Assignee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::Title => "title",
            RecordField::Body => "body",
            RecordField::Status => "status",
            RecordField::Priority => "priority",
            RecordField::Labels => "labels",
            RecordField::Assignee => "assignee",
        }
    }
}

impl std::fmt::Display for RecordField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The synchronized portion of a record, without identity or bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordContent {
    pub title: String,
    pub body: String,
    pub status: String,
    pub priority: Option<String>,
    pub labels: BTreeSet<String>,
    pub assignee: Option<String>,
}

impl RecordContent {
    /// Fields whose values differ, in [`RecordField::ALL`] order.
    pub fn diff(&self, other: &RecordContent) -> Vec<RecordField> {
        RecordField::ALL
            .into_iter()
            .filter(|field| match field {
                RecordField::Title => self.title != other.title,
                RecordField::Body => self.body != other.body,
                RecordField::Status => self.status != other.status,
                RecordField::Priority => self.priority != other.priority,
                RecordField::Labels => self.labels != other.labels,
                RecordField::Assignee => self.assignee != other.assignee,
            })
            .collect()
    }
}

/// Issue/task as seen by the engine. Rebuilt from a fetch every pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub origin: RecordId,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub status: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Tombstone reported by a backend for a soft-deleted record;
    /// `updated_at` is then the deletion time.
    #[serde(default)]
    pub deleted: bool,
}

impl Record {
    pub fn new(system: impl Into<String>, id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            origin: RecordId::new(system, id),
            title: title.into(),
            body: String::new(),
            status: "open".to_string(),
            priority: None,
            labels: BTreeSet::new(),
            assignee: None,
            created_at: now,
            updated_at: now,
            metadata: BTreeMap::new(),
            deleted: false,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        if self.created_at > at {
            self.created_at = at;
        }
        self
    }

    pub fn with_xref(mut self, counterpart_id: impl Into<String>) -> Self {
        self.metadata
            .insert(XREF_KEY.to_string(), Value::String(counterpart_id.into()));
        self
    }

    pub fn with_dependencies<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<Value> = ids.into_iter().map(|s| Value::String(s.into())).collect();
        self.metadata
            .insert(DEPENDS_ON_KEY.to_string(), Value::Array(ids));
        self
    }

    pub fn tombstone(mut self) -> Self {
        self.deleted = true;
        self
    }

    pub fn id(&self) -> &str {
        &self.origin.id
    }

    /// Counterpart id stored by a previous pass, if linked.
    pub fn xref(&self) -> Option<&str> {
        self.metadata
            .get(XREF_KEY)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Same-side ids this record depends on. Non-string entries are ignored.
    pub fn depends_on(&self) -> Vec<String> {
        match self.metadata.get(DEPENDS_ON_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn content(&self) -> RecordContent {
        RecordContent {
            title: self.title.clone(),
            body: self.body.clone(),
            status: self.status.clone(),
            priority: self.priority.clone(),
            labels: self.labels.clone(),
            assignee: self.assignee.clone(),
        }
    }

    /// Build a record for `system` carrying `content`, linked back to `self`.
    ///
    /// The id is left empty; the creating backend assigns it. `depends_on`
    /// must already be ids in `system`.
    pub fn counterpart_draft(
        &self,
        system: &str,
        content: &RecordContent,
        depends_on: &[String],
    ) -> Record {
        let mut draft = Record::new(system, "", content.title.clone());
        draft.set_content(content);
        draft.created_at = self.created_at;
        draft.updated_at = self.updated_at;
        if !depends_on.is_empty() {
            draft
                .metadata
                .insert(DEPENDS_ON_KEY.to_string(), dependency_list(depends_on));
        }
        draft.metadata.insert(
            XREF_KEY.to_string(),
            Value::String(self.origin.id.clone()),
        );
        draft
    }

    pub fn set_content(&mut self, content: &RecordContent) {
        self.title = content.title.clone();
        self.body = content.body.clone();
        self.status = content.status.clone();
        self.priority = content.priority.clone();
        self.labels = content.labels.clone();
        self.assignee = content.assignee.clone();
    }

    pub fn apply_patch(&mut self, patch: &RecordPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(body) = &patch.body {
            self.body = body.clone();
        }
        if let Some(status) = &patch.status {
            self.status = status.clone();
        }
        if let Some(priority) = &patch.priority {
            self.priority = priority.clone();
        }
        if let Some(labels) = &patch.labels {
            self.labels = labels.clone();
        }
        if let Some(assignee) = &patch.assignee {
            self.assignee = assignee.clone();
        }
        for (k, v) in &patch.metadata {
            self.metadata.insert(k.clone(), v.clone());
        }
    }
}

/// Partial update sent to `RemoteClient::update_record`.
///
/// `None` leaves a field untouched; for optional fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Option<String>>,
    /// Metadata entries to upsert.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl RecordPatch {
    /// Patch that only writes the cross-reference.
    pub fn link(counterpart_id: impl Into<String>) -> Self {
        let mut patch = Self::default();
        patch
            .metadata
            .insert(XREF_KEY.to_string(), Value::String(counterpart_id.into()));
        patch
    }

    /// Patch turning `current` into `desired`, touching only differing fields.
    pub fn between(current: &RecordContent, desired: &RecordContent) -> Self {
        let mut patch = Self::default();
        for field in current.diff(desired) {
            match field {
                RecordField::Title => patch.title = Some(desired.title.clone()),
                RecordField::Body => patch.body = Some(desired.body.clone()),
                RecordField::Status => patch.status = Some(desired.status.clone()),
                RecordField::Priority => patch.priority = Some(desired.priority.clone()),
                RecordField::Labels => patch.labels = Some(desired.labels.clone()),
                RecordField::Assignee => patch.assignee = Some(desired.assignee.clone()),
            }
        }
        patch
    }

    /// Patch that only writes the dependency list.
    pub fn dependencies(ids: &[String]) -> Self {
        let mut patch = Self::default();
        patch
            .metadata
            .insert(DEPENDS_ON_KEY.to_string(), dependency_list(ids));
        patch
    }

    pub fn has_content_changes(&self) -> bool {
        self.title.is_some()
            || self.body.is_some()
            || self.status.is_some()
            || self.priority.is_some()
            || self.labels.is_some()
            || self.assignee.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_content_changes() && self.metadata.is_empty()
    }
}

fn dependency_list(ids: &[String]) -> Value {
    Value::Array(ids.iter().cloned().map(Value::String).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_reports_fields_in_canonical_order() {
        let a = Record::new("a", "1", "Fix login bug").with_labels(["bug"]);
        let b = Record::new("b", "9", "Fix login bug!")
            .with_labels(["bug", "auth"])
            .with_status("closed");
        assert_eq!(
            a.content().diff(&b.content()),
            vec![RecordField::Title, RecordField::Status, RecordField::Labels]
        );
    }

    #[test]
    fn test_xref_and_dependencies_read_from_metadata() {
        let r = Record::new("a", "1", "t")
            .with_xref("B-7")
            .with_dependencies(["2", "3"]);
        assert_eq!(r.xref(), Some("B-7"));
        assert_eq!(r.depends_on(), vec!["2", "3"]);
        assert_eq!(Record::new("a", "2", "t").xref(), None);
    }

    #[test]
    fn test_patch_between_only_touches_differences() {
        let current = Record::new("a", "1", "same").with_assignee("ana").content();
        let mut desired = current.clone();
        desired.assignee = None;
        desired.labels.insert("p1".to_string());

        let patch = RecordPatch::between(&current, &desired);
        assert!(patch.title.is_none());
        assert_eq!(patch.assignee, Some(None));
        assert!(patch.labels.as_ref().unwrap().contains("p1"));

        let mut record = Record::new("a", "1", "same").with_assignee("ana");
        record.apply_patch(&patch);
        assert_eq!(record.content(), desired);
    }

    #[test]
    fn test_link_patch_is_metadata_only() {
        let patch = RecordPatch::link("B-1");
        assert!(!patch.has_content_changes());
        assert!(!patch.is_empty());
        let mut r = Record::new("a", "1", "t");
        r.apply_patch(&patch);
        assert_eq!(r.xref(), Some("B-1"));
    }

    #[test]
    fn test_counterpart_draft_links_back_to_origin() {
        let origin = Record::new("a", "A-1", "Fix login bug").with_labels(["bug"]);
        let draft = origin.counterpart_draft("b", &origin.content(), &[]);
        assert_eq!(draft.origin.system, "b");
        assert_eq!(draft.xref(), Some("A-1"));
        assert_eq!(draft.content(), origin.content());
        assert!(draft.depends_on().is_empty());
    }

    #[test]
    fn test_counterpart_draft_never_copies_origin_side_dependencies() {
        let origin = Record::new("a", "A-2", "child").with_dependencies(["A-1", "A-9"]);

        let draft = origin.counterpart_draft("b", &origin.content(), &[]);
        assert!(!draft.metadata.contains_key(DEPENDS_ON_KEY));

        let draft = origin.counterpart_draft("b", &origin.content(), &["B-1".to_string()]);
        assert_eq!(draft.depends_on(), vec!["B-1"]);

        let mut record = Record::new("b", "B-2", "child");
        record.apply_patch(&RecordPatch::dependencies(&["B-1".to_string()]));
        assert_eq!(record.depends_on(), vec!["B-1"]);
    }
}
