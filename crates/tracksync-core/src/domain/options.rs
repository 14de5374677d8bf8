//! Caller-supplied pass options and their validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ValidationError;
use super::record::Record;

pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 1000;

/// Which way changes flow in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncDirection {
    #[serde(rename = "bidirectional")]
    Bidirectional,
    #[serde(rename = "a-to-b")]
    AToB,
    #[serde(rename = "b-to-a")]
    BToA,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Bidirectional => "bidirectional",
            SyncDirection::AToB => "a-to-b",
            SyncDirection::BToA => "b-to-a",
        }
    }
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncDirection {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bidirectional" => Ok(SyncDirection::Bidirectional),
            "a-to-b" => Ok(SyncDirection::AToB),
            "b-to-a" => Ok(SyncDirection::BToA),
            other => Err(ValidationError::InvalidDirection {
                value: other.to_string(),
            }),
        }
    }
}

/// Record filters passed to `fetch_records`. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncFilters {
    pub labels: Vec<String>,
    pub states: Vec<String>,
    pub assignees: Vec<String>,
}

impl SyncFilters {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.states.is_empty() && self.assignees.is_empty()
    }

    /// A record matches when every non-empty list has at least one hit.
    pub fn matches(&self, record: &Record) -> bool {
        let labels_ok =
            self.labels.is_empty() || self.labels.iter().any(|l| record.labels.contains(l));
        let states_ok = self.states.is_empty() || self.states.iter().any(|s| *s == record.status);
        let assignees_ok = self.assignees.is_empty()
            || record
                .assignee
                .as_ref()
                .is_some_and(|a| self.assignees.contains(a));
        labels_ok && states_ok && assignees_ok
    }
}

/// Pass options as received from the embedding layer.
///
/// `direction` and `since` stay textual until [`SyncOptions::validate`] so
/// that malformed input becomes a failed result instead of a panic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub direction: String,
    pub dry_run: bool,
    pub force: bool,
    /// RFC 3339 cursor: records untouched since then are not fetched.
    pub since: Option<String>,
    pub batch_size: usize,
    pub filters: SyncFilters,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            direction: SyncDirection::Bidirectional.as_str().to_string(),
            dry_run: false,
            force: false,
            since: None,
            batch_size: 50,
            filters: SyncFilters::default(),
        }
    }
}

impl SyncOptions {
    pub fn new(direction: SyncDirection) -> Self {
        Self {
            direction: direction.as_str().to_string(),
            ..Self::default()
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since.to_rfc3339());
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn filters(mut self, filters: SyncFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn validate(&self) -> Result<ValidatedOptions, ValidationError> {
        let direction: SyncDirection = self.direction.parse()?;

        let since = match &self.since {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw.trim())
                    .map_err(|e| ValidationError::InvalidSince {
                        value: raw.clone(),
                        reason: e.to_string(),
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(ValidationError::BatchSizeOutOfRange {
                value: self.batch_size,
            });
        }

        Ok(ValidatedOptions {
            direction,
            dry_run: self.dry_run,
            force: self.force,
            since,
            batch_size: self.batch_size,
            filters: self.filters.clone(),
        })
    }
}

/// Typed options produced by successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedOptions {
    pub direction: SyncDirection,
    pub dry_run: bool,
    pub force: bool,
    pub since: Option<DateTime<Utc>>,
    pub batch_size: usize,
    pub filters: SyncFilters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_roundtrip() {
        for d in [
            SyncDirection::Bidirectional,
            SyncDirection::AToB,
            SyncDirection::BToA,
        ] {
            assert_eq!(d.as_str().parse::<SyncDirection>().unwrap(), d);
        }
        assert!("sideways".parse::<SyncDirection>().is_err());
    }

    #[test]
    fn test_batch_size_bounds() {
        for ok in [1, 1000] {
            assert!(SyncOptions::default().batch_size(ok).validate().is_ok());
        }
        for bad in [0, 1001] {
            let err = SyncOptions::default().batch_size(bad).validate().unwrap_err();
            assert!(err.to_string().contains("between 1 and 1000"));
        }
    }

    #[test]
    fn test_since_must_parse() {
        let mut opts = SyncOptions::default();
        opts.since = Some("yesterday".to_string());
        assert!(matches!(
            opts.validate(),
            Err(ValidationError::InvalidSince { .. })
        ));

        opts.since = Some("2024-05-01T10:00:00Z".to_string());
        let validated = opts.validate().unwrap();
        assert_eq!(
            validated.since.unwrap().to_rfc3339(),
            "2024-05-01T10:00:00+00:00"
        );
    }

    #[test]
    fn test_filters_match_any_within_each_list() {
        let record = Record::new("a", "1", "t")
            .with_labels(["bug", "ui"])
            .with_assignee("ana");
        let filters = SyncFilters {
            labels: vec!["bug".to_string(), "infra".to_string()],
            states: vec!["open".to_string()],
            assignees: vec!["ana".to_string()],
        };
        assert!(filters.matches(&record));

        let other_assignee = SyncFilters {
            assignees: vec!["bo".to_string()],
            ..SyncFilters::default()
        };
        assert!(!other_assignee.matches(&record));
        assert!(SyncFilters::default().matches(&record));
    }
}
