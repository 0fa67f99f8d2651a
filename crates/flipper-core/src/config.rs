//! flipper.toml configuration parser.
//!
//! Every section and key is optional; a missing file section falls back to
//! the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Identity written into `restartedBy` unless configured otherwise.
pub const DEFAULT_IDENTITY: &str = "flipper-operator";

/// Kind literal written into `restartedByCRDKind`.
pub const DEFAULT_RECORD_KIND: &str = "rollingupdate";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub controller: IdentityConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub identity: String,
    pub record_kind: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            identity: DEFAULT_IDENTITY.to_string(),
            record_kind: DEFAULT_RECORD_KIND.to_string(),
        }
    }
}

/// Conflict retry budget for workload writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 1000,
            multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between full record resyncs.
    pub resync_secs: u64,
    pub error_backoff_base_ms: u64,
    pub error_backoff_max_secs: u64,
    /// Records reconciled in parallel.
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resync_secs: 60,
            error_backoff_base_ms: 1000,
            error_backoff_max_secs: 300,
            max_concurrent: 4,
        }
    }
}

impl SchedulerConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn error_backoff_base(&self) -> Duration {
        Duration::from_millis(self.error_backoff_base_ms)
    }

    pub fn error_backoff_max(&self) -> Duration {
        Duration::from_secs(self.error_backoff_max_secs)
    }
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "controller config loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.identity.trim().is_empty() {
            return Err(ConfigError::Invalid("controller.identity is empty".into()));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid("retry.attempts must be at least 1".into()));
        }
        if !(self.retry.multiplier >= 1.0) {
            return Err(ConfigError::Invalid("retry.multiplier must be >= 1.0".into()));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.max_backoff_ms is below retry.initial_backoff_ms".into(),
            ));
        }
        if self.scheduler.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrent must be at least 1".into(),
            ));
        }
        if self.scheduler.resync_secs == 0 {
            return Err(ConfigError::Invalid("scheduler.resync_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ControllerConfig::parse("").unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.controller.identity, "flipper-operator");
        assert_eq!(config.retry.attempts, 5);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ControllerConfig::parse(
            r#"
[retry]
attempts = 3
multiplier = 2.0

[scheduler]
max_concurrent = 1
"#,
        )
        .unwrap();
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.initial_backoff_ms, 10);
        assert_eq!(config.scheduler.max_concurrent, 1);
        assert_eq!(config.scheduler.resync_secs, 60);
    }

    #[test]
    fn rejects_zero_attempts() {
        let err = ControllerConfig::parse("[retry]\nattempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_shrinking_multiplier() {
        let err = ControllerConfig::parse("[retry]\nmultiplier = 0.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = ControllerConfig::default();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("flipper-operator"));
        assert_eq!(ControllerConfig::parse(&text).unwrap(), config);
    }
}
