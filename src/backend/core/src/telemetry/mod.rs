//! Telemetry: Logging and Metrics Infrastructure.
//!
//! - **Logging**: Structured JSON/pretty logging with credential redaction
//! - **Metrics**: Prometheus metrics for tasks, tools and queue depth
//!
//! # Example
//!
//! ```rust,no_run
//! use dbvault_core::telemetry::{TelemetryConfig, init_telemetry};
//!
//! let config = TelemetryConfig::default();
//! let _handle = init_telemetry(&config).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{
    init_logging, LogFormat, LoggingConfig, RedactionConfig, RedactionPattern,
    SensitiveFieldRedactor,
};
pub use metrics::{
    init_metrics, MetricsConfig, MetricsRegistry, QueueDepthGauge, TaskMetrics, ToolMetrics,
};

use crate::config::Config;

/// Unified telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for identification in logs and metrics
    pub service_name: String,

    /// Environment (development, staging, production)
    pub environment: String,

    pub logging: LoggingConfig,

    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: "development".to_string(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// Build from the application configuration.
    pub fn from_config(config: &Config, service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            environment: config.environment.clone(),
            logging: config.logging.clone(),
            metrics: config.metrics.clone(),
        }
    }
}

fn default_service_name() -> String {
    "dbvault".to_string()
}

/// Initialize logging and metrics. Call once at startup.
///
/// # Errors
///
/// Returns an error if any component fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryHandle> {
    let metrics = init_metrics(&config.metrics, &config.service_name)?;
    init_logging(&config.logging, &config.environment)?;

    Ok(TelemetryHandle { metrics })
}

/// Handle for the telemetry lifecycle.
pub struct TelemetryHandle {
    pub metrics: MetricsRegistry,
}

impl TelemetryHandle {
    pub fn shutdown(self) {
        tracing::info!("Telemetry shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_from_app_config() {
        let mut app = Config::default();
        app.environment = "production".to_string();
        let config = TelemetryConfig::from_config(&app, "dbvault-worker");
        assert_eq!(config.service_name, "dbvault-worker");
        assert_eq!(config.environment, "production");
    }
}
