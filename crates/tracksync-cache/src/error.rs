//! Error types for tracksync-cache

use thiserror::Error;

/// Errors raised by cache backends.
///
/// `CacheManager` never surfaces these from `get`/`set`; a failing backend
/// degrades to miss behaviour and the error is logged.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Filesystem error from the disk backend
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry or snapshot (de)serialization failed
    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalidation pattern could not be compiled
    #[error("invalid cache key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Rejected configuration value
    #[error("invalid cache config: {0}")]
    InvalidConfig(String),

    /// Background task failure
    #[error("cache backend failure: {0}")]
    Backend(String),
}

/// Result type for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern_displays_pattern() {
        let err = CacheError::InvalidPattern {
            pattern: "records:[".to_string(),
            reason: "unclosed class".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("records:["));
        assert!(msg.contains("unclosed class"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CacheError = io.into();
        assert!(err.to_string().contains("denied"));
    }
}
