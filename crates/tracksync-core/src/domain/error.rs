//! Error taxonomy for the synchronization engine.

use tracksync_cache::CacheError;

/// Rejected `SyncOptions`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid direction '{value}': expected bidirectional, a-to-b or b-to-a")]
    InvalidDirection { value: String },

    #[error("invalid since timestamp '{value}': {reason}")]
    InvalidSince { value: String, reason: String },

    #[error("batch size must be between 1 and 1000, got {value}")]
    BatchSizeOutOfRange { value: usize },
}

/// Failures reported by a remote tracker client.
///
/// Every variant is retryable by the batch processor up to its policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The backend could not be reached. Callers never substitute data.
    #[error("{system} unavailable: {reason}")]
    Unavailable { system: String, reason: String },

    #[error("{system} record not found: {id}")]
    NotFound { system: String, id: String },

    #[error("{system} rejected request: {reason}")]
    Rejected { system: String, reason: String },

    #[error("{system} {operation} timed out after {timeout_ms}ms")]
    Timeout {
        system: String,
        operation: String,
        timeout_ms: u64,
    },
}

/// Lifecycle event delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to deliver {event} event: {reason}")]
pub struct EventError {
    pub event: String,
    pub reason: String,
}

/// Errors that can end a sync pass early.
///
/// `SyncOrchestrator::execute_sync` never returns these; they are folded
/// into `SyncResult::errors`.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("sync already in progress")]
    InProgress,

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("sync cancelled")]
    Cancelled,

    #[error("event error: {0}")]
    Event(#[from] EventError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Rejected engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("invalid value '{value}' for environment variable {var}: {reason}")]
    Env {
        var: String,
        value: String,
        reason: String,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("cache config error: {0}")]
    Cache(#[from] CacheError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_error_mentions_bounds() {
        let err = ValidationError::BatchSizeOutOfRange { value: 0 };
        assert!(err.to_string().contains("between 1 and 1000"));
    }

    #[test]
    fn test_in_progress_display() {
        assert!(SyncError::InProgress.to_string().contains("in progress"));
    }

    #[test]
    fn test_remote_error_converts_into_sync_error() {
        let err: SyncError = RemoteError::Unavailable {
            system: "jira".to_string(),
            reason: "connection refused".to_string(),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("jira unavailable"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_timeout_error_displays_operation() {
        let err = RemoteError::Timeout {
            system: "github".to_string(),
            operation: "fetch_records".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "github fetch_records timed out after 250ms");
    }
}
