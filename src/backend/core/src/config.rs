//! Configuration management.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, VaultError};
use crate::executor::compression::CompressionAlgorithm;
use crate::telemetry::{LoggingConfig, MetricsConfig};

/// Environment variable prefix; nested keys use `__`, e.g. `DBVAULT__REDIS__URL`.
pub const ENV_PREFIX: &str = "DBVAULT";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Broker configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Worker runtime configuration
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Process executor configuration
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Optional PostgreSQL store for backup job records
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Deployment environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix for every key the queue writes
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// Number of concurrent handlers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Lane name to relative weight
    #[serde(default = "default_queues")]
    pub queues: BTreeMap<String, u32>,

    /// Sleep between dequeue attempts when every lane is empty
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// How often due scheduled/retry tasks are promoted
    #[serde(default = "default_forward_interval", with = "humantime_serde")]
    pub forward_interval: Duration,

    /// Grace period for in-flight tasks on shutdown
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Timeout applied to tasks enqueued without one
    #[serde(default = "default_task_timeout", with = "humantime_serde")]
    pub default_task_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queues: default_queues(),
            poll_interval: default_poll_interval(),
            forward_interval: default_forward_interval(),
            shutdown_timeout: default_shutdown_timeout(),
            default_task_timeout: default_task_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Directory backup artifacts are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Explicit binary paths, keyed by tool name (`pg_dump`, `mysql`, `zstd`, ...)
    #[serde(default)]
    pub tool_paths: BTreeMap<String, PathBuf>,

    /// Compression applied when a request does not pick one
    #[serde(default)]
    pub default_compression: Option<String>,

    /// How long a produced artifact is kept before it expires
    #[serde(default = "default_artifact_retention", with = "humantime_serde")]
    pub artifact_retention: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            tool_paths: BTreeMap::new(),
            default_compression: None,
            artifact_retention: default_artifact_retention(),
        }
    }
}

impl ExecutorConfig {
    /// Parse the configured default compression, if any.
    pub fn default_algorithm(&self) -> Result<Option<CompressionAlgorithm>> {
        self.default_compression
            .as_deref()
            .map(str::parse::<CompressionAlgorithm>)
            .transpose()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

// Default value functions
fn default_environment() -> String {
    "development".to_string()
}
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_key_prefix() -> String { "dbvault".to_string() }
fn default_concurrency() -> usize { 10 }
fn default_queues() -> BTreeMap<String, u32> {
    BTreeMap::from([
        ("critical".to_string(), 6),
        ("default".to_string(), 3),
        ("low".to_string(), 1),
    ])
}
fn default_poll_interval() -> Duration { Duration::from_secs(1) }
fn default_forward_interval() -> Duration { Duration::from_secs(5) }
fn default_shutdown_timeout() -> Duration { Duration::from_secs(30) }
fn default_task_timeout() -> Duration { Duration::from_secs(2 * 60 * 60) }
fn default_output_dir() -> PathBuf { std::env::temp_dir().join("dbvault") }
fn default_artifact_retention() -> Duration { Duration::from_secs(30 * 24 * 60 * 60) }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that would only fail later, at task time.
    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            return Err(VaultError::configuration("worker.concurrency must be at least 1"));
        }
        if self.worker.queues.is_empty() {
            return Err(VaultError::configuration("worker.queues must name at least one lane"));
        }
        if let Some((lane, _)) = self.worker.queues.iter().find(|(_, weight)| **weight == 0) {
            return Err(VaultError::configuration(format!(
                "lane '{}' has weight 0",
                lane
            )));
        }
        self.executor.default_algorithm()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker.queues.get("critical"), Some(&6));
        assert_eq!(config.redis.key_prefix, "dbvault");
    }

    #[test]
    fn test_unknown_default_compression_is_config_error() {
        let mut config = Config::default();
        config.executor.default_compression = Some("rar".to_string());
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedAlgorithm);
    }

    #[test]
    fn test_zero_weight_lane_rejected() {
        let mut config = Config::default();
        config.worker.queues.insert("low".to_string(), 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_humantime_durations() {
        let settings: WorkerSettings = serde_json::from_value(serde_json::json!({
            "poll_interval": "250ms",
            "default_task_timeout": "2h"
        }))
        .unwrap();
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.default_task_timeout, Duration::from_secs(7200));
        assert_eq!(settings.concurrency, 10);
    }
}
