//! Engine configuration.
//!
//! One typed [`EngineConfig`] is built from defaults, the environment or any
//! JSON document, validated once by the `load_*` constructors and then shared
//! as an immutable `Arc<EngineConfig>`.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracksync_cache::{BackendKind, CacheConfig};

use crate::batch::BatchConfig;
use crate::conflict::{ConflictConfig, TieBreak};
use crate::domain::{ConfigError, ResolutionStrategy, SyncOptions, MAX_BATCH_SIZE, MIN_BATCH_SIZE};
use crate::sync::matcher::TitleMatchPolicy;

/// Prefix of every environment variable read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "TRACKSYNC_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Deadline for each remote call (milliseconds).
    pub remote_timeout_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            remote_timeout_ms: 30_000,
        }
    }
}

impl SyncSettings {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sync: SyncSettings,
    pub conflict: ConflictConfig,
    pub batch: BatchConfig,
    pub cache: CacheConfig,
    pub matching: TitleMatchPolicy,
}

impl EngineConfig {
    /// Defaults overlaid with `TRACKSYNC_*` variables. Not validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by full variable
    /// name. Not validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut config = Self::default();

        if let Some(v) = env.parse("REMOTE_TIMEOUT_MS")? {
            config.sync.remote_timeout_ms = v;
        }

        if let Some(v) = env.parse_with("CONFLICT_STRATEGY", ResolutionStrategy::from_str)? {
            config.conflict.strategy = v;
        }
        if let Some(v) = env.parse_with("FORCE_STRATEGY", ResolutionStrategy::from_str)? {
            config.conflict.default_strategy = v;
        }
        if let Some(v) = env.parse_with("TIE_BREAK", parse_tie_break)? {
            config.conflict.tie_break = v;
        }

        if let Some(v) = env.parse("BATCH_SIZE")? {
            config.batch.batch_size = v;
        }
        if let Some(v) = env.parse("MAX_CONCURRENCY")? {
            config.batch.max_concurrency = v;
        }
        if let Some(v) = env.parse("MAX_ATTEMPTS")? {
            config.batch.max_attempts = v;
        }
        if let Some(v) = env.parse("RETRY_DELAY_MS")? {
            config.batch.retry_delay_ms = v;
        }
        if let Some(v) = env.parse("ITEM_TIMEOUT_MS")? {
            config.batch.item_timeout_ms = Some(v);
        }

        if let Some(v) = env.parse_with("CACHE_BACKEND", |s| {
            BackendKind::from_str(s).map_err(|e| e.to_string())
        })? {
            config.cache.backend = v;
        }
        if let Some(v) = env.parse("CACHE_CAPACITY")? {
            config.cache.capacity = v;
        }
        if let Some(v) = env.get("CACHE_DIR") {
            config.cache.disk_root = v.into();
        }
        if let Some(v) = env.parse("CACHE_TTL_MS")? {
            config.cache.default_ttl_ms = Some(v);
        }

        if let Some(v) = env.parse("TITLE_MATCH")? {
            config.matching.enabled = v;
        }
        if let Some(v) = env.parse("TITLE_SIMILARITY")? {
            config.matching.min_similarity = v;
        }

        Ok(config)
    }

    /// Parse a (possibly partial) JSON document over the defaults. Not validated.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// [`from_env`](Self::from_env) followed by validation.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        Self::from_env()?.validated()
    }

    /// [`from_json_str`](Self::from_json_str) followed by validation.
    pub fn load_from_json_str(json: &str) -> Result<Self, ConfigError> {
        Self::from_json_str(json)?.validated()
    }

    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: String| ConfigError::Invalid {
            field: field.to_string(),
            reason,
        };

        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.batch.batch_size) {
            return Err(invalid(
                "batch.batch_size",
                format!(
                    "must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}, got {}",
                    self.batch.batch_size
                ),
            ));
        }
        if self.batch.max_concurrency == 0 {
            return Err(invalid("batch.max_concurrency", "must be at least 1".to_string()));
        }
        if self.batch.max_attempts == 0 {
            return Err(invalid("batch.max_attempts", "must be at least 1".to_string()));
        }
        if self.sync.remote_timeout_ms == 0 {
            return Err(invalid("sync.remote_timeout_ms", "must be positive".to_string()));
        }
        let similarity = self.matching.min_similarity;
        if !(similarity > 0.0 && similarity <= 1.0) {
            return Err(invalid(
                "matching.min_similarity",
                format!("must be in (0, 1], got {similarity}"),
            ));
        }
        if self.conflict.default_strategy == ResolutionStrategy::Manual {
            return Err(invalid(
                "conflict.default_strategy",
                "forced passes need an automatic strategy, not manual".to_string(),
            ));
        }
        self.cache.validate()?;
        Ok(())
    }

    /// Pass options seeded with the configured batch size.
    pub fn default_options(&self) -> SyncOptions {
        SyncOptions::default().batch_size(self.batch.batch_size)
    }
}

fn parse_tie_break(raw: &str) -> Result<TieBreak, String> {
    match raw.to_ascii_lowercase().as_str() {
        "source" => Ok(TieBreak::Source),
        "target" => Ok(TieBreak::Target),
        other => Err(format!("expected source or target, got '{other}'")),
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn var(name: &str) -> String {
        format!("{ENV_PREFIX}{name}")
    }

    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&Self::var(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.parse_with(name, |s| s.parse::<T>().map_err(|e| e.to_string()))
    }

    fn parse_with<T, P>(&self, name: &str, parse: P) -> Result<Option<T>, ConfigError>
    where
        P: Fn(&str) -> Result<T, String>,
    {
        let Some(raw) = self.get(name) else {
            return Ok(None);
        };
        parse(&raw).map(Some).map_err(|reason| ConfigError::Env {
            var: Self::var(name),
            value: raw,
            reason,
        })
    }
}
