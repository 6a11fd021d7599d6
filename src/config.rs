/*!
 * Configuration types for aigate
 */

use aigate_core_resilience::{RetryConfig, DEFAULT_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatcher::DispatcherConfig;
use crate::error::{GateError, Result};

/// Top-level configuration, usually loaded from a TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Admission queue sizing and record retention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum number of pending requests (0 = default)
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// How long finished status records are kept, in seconds (0 = forever)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            retention_secs: default_retention_secs(),
        }
    }
}

/// Backoff settings in file-friendly units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per request, first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Fraction of each delay used as random ± perturbation (0 = none)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Idle wait between polls of an empty queue
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-attempt timeout for the backend call (0 = none)
    #[serde(default)]
    pub attempt_timeout_ms: u64,

    /// Upper bound on a request's own max_retry override
    #[serde(default = "default_max_attempts_ceiling")]
    pub max_attempts_ceiling: u32,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            attempt_timeout_ms: 0,
            max_attempts_ceiling: default_max_attempts_ceiling(),
        }
    }
}

/// Diagnostic output settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for level = debug)
    #[serde(default)]
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,

    Warn,

    #[default]
    Info,

    Debug,

    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.1
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_max_attempts_ceiling() -> u32 {
    10
}

/// Environment variables that override file values
pub const ENV_QUEUE_CAPACITY: &str = "AIGATE_QUEUE_CAPACITY";
pub const ENV_WORKERS: &str = "AIGATE_WORKERS";
pub const ENV_MAX_ATTEMPTS: &str = "AIGATE_MAX_ATTEMPTS";

impl GateConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: GateConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `AIGATE_*` overrides using the given variable lookup
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_QUEUE_CAPACITY) {
            self.queue.capacity = parse_env(ENV_QUEUE_CAPACITY, &v)?;
        }
        if let Some(v) = lookup(ENV_WORKERS) {
            self.dispatcher.workers = parse_env(ENV_WORKERS, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_ATTEMPTS) {
            self.retry.max_attempts = parse_env(ENV_MAX_ATTEMPTS, &v)?;
        }
        Ok(())
    }

    /// Apply `AIGATE_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.workers == 0 {
            return Err(GateError::Config(
                "dispatcher.workers must be at least 1".to_string(),
            ));
        }
        if self.dispatcher.max_attempts_ceiling == 0 {
            return Err(GateError::Config(
                "dispatcher.max_attempts_ceiling must be at least 1".to_string(),
            ));
        }
        self.retry_config()
            .validate()
            .map_err(|e| GateError::Config(format!("retry: {}", e)))
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            multiplier: self.retry.multiplier,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter: self.retry.jitter,
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let attempt_timeout = match self.dispatcher.attempt_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        DispatcherConfig {
            workers: self.dispatcher.workers,
            poll_interval: Duration::from_millis(self.dispatcher.poll_interval_ms),
            attempt_timeout,
            max_attempts_ceiling: self.dispatcher.max_attempts_ceiling,
            ..Default::default()
        }
    }

    /// Retention window for finished records, None when kept forever
    pub fn retention(&self) -> Option<Duration> {
        match self.queue.retention_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| GateError::Config(format!("{} has invalid value '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = GateConfig::default();
        assert_eq!(config.queue.capacity, 1000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.dispatcher.workers, 4);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_config_conversion() {
        let config = GateConfig::default();
        let retry = config.retry_config();
        assert_eq!(retry, RetryConfig::default());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: GateConfig = toml::from_str(
            r#"
            [queue]
            capacity = 16

            [retry]
            jitter = 0.0

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.capacity, 16);
        assert_eq!(config.queue.retention_secs, 3600);
        assert_eq!(config.retry.jitter, 0.0);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_file_round_trip() {
        let mut config = GateConfig::default();
        config.dispatcher.attempt_timeout_ms = 5_000;
        config.logging.file = Some(PathBuf::from("/tmp/aigate.log"));

        let file = NamedTempFile::new().unwrap();
        config.to_file(file.path()).unwrap();

        let loaded = GateConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.dispatcher_config().attempt_timeout,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_invalid_file_rejected() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[retry]\njitter = 2.5\n").unwrap();

        let err = GateConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, GateError::Config(_)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = GateConfig::default();
        config.dispatcher.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_QUEUE_CAPACITY, "8"),
            (ENV_WORKERS, " 2 "),
            (ENV_MAX_ATTEMPTS, "6"),
        ]
        .into_iter()
        .collect();

        let mut config = GateConfig::default();
        config
            .apply_env_overrides_from(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.queue.capacity, 8);
        assert_eq!(config.dispatcher.workers, 2);
        assert_eq!(config.retry.max_attempts, 6);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = GateConfig::default();
        let err = config
            .apply_env_overrides_from(|k| (k == ENV_WORKERS).then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_WORKERS));
    }

    #[test]
    fn test_retention_zero_means_forever() {
        let mut config = GateConfig::default();
        assert_eq!(config.retention(), Some(Duration::from_secs(3600)));
        config.queue.retention_secs = 0;
        assert_eq!(config.retention(), None);
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
