//! Tracing setup for processes embedding the sync engine.
//!
//! Filter directives come from `TRACKSYNC_LOG`, then `RUST_LOG`, then a
//! default that logs the engine crates at the requested level and everything
//! else at `warn`. JSON output carries the current pass span, so every line
//! of a pass can be grouped by `pass_id`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Engine-specific filter variable; takes precedence over `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "TRACKSYNC_LOG";

const ENGINE_TARGETS: [&str; 2] = ["tracksync_core", "tracksync_cache"];

/// `warn` globally, `level` for the engine crates.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(ENGINE_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

/// First non-blank of `tracksync_log` and `rust_log`, else the defaults.
fn resolve_directives(
    tracksync_log: Option<String>,
    rust_log: Option<String>,
    level: Level,
) -> String {
    tracksync_log
        .into_iter()
        .chain(rust_log)
        .find(|d| !d.trim().is_empty())
        .unwrap_or_else(|| default_directives(level))
}

/// The filter to install, plus the directives rejected on the way if any.
fn env_filter(level: Level) -> (EnvFilter, Option<String>) {
    let directives = resolve_directives(
        std::env::var(LOG_ENV_VAR).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        level,
    );
    match EnvFilter::try_new(&directives) {
        Ok(filter) => (filter, None),
        Err(_) => (EnvFilter::new(default_directives(level)), Some(directives)),
    }
}

/// Install the global subscriber. Only the first call in a process has any
/// effect.
pub fn init_tracing(json: bool, level: Level) {
    let (filter, rejected) = env_filter(level);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
            .ok();
    } else {
        registry.with(fmt::layer().with_target(true)).try_init().ok();
    }
    if let Some(directives) = rejected {
        tracing::warn!(filter = %directives, "invalid log filter ignored, using defaults");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_level_to_engine_crates() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,tracksync_core=debug,tracksync_cache=debug"
        );
    }

    #[test]
    fn test_engine_variable_wins_over_rust_log() {
        let resolved = resolve_directives(
            Some("tracksync_core=trace".to_string()),
            Some("info".to_string()),
            Level::INFO,
        );
        assert_eq!(resolved, "tracksync_core=trace");

        let resolved = resolve_directives(Some("  ".to_string()), Some("info".to_string()), Level::INFO);
        assert_eq!(resolved, "info");

        assert_eq!(
            resolve_directives(None, None, Level::WARN),
            default_directives(Level::WARN)
        );
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing(false, Level::DEBUG);
        init_tracing(true, Level::INFO);
        tracing::info!(event = "telemetry.test", "still logging after re-init");
    }
}
