//! Prometheus Metrics for Tasks, Dump Tools and Queue Depth.
//!
//! This module provides metrics collection with:
//!
//! - Task outcome counters and duration histograms per task type
//! - External tool run counters (pg_dump, mysqldump, zstd, ...)
//! - Queue depth gauges per lane
//!
//! # Example
//!
//! ```rust,no_run
//! use dbvault_core::telemetry::metrics::{TaskMetrics, ToolMetrics};
//!
//! TaskMetrics::record_completed("backup:execute", 12.5);
//! ToolMetrics::record_run("pg_dump", true);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Prometheus exporter listen address (e.g., "0.0.0.0:9090")
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,

    /// Histogram buckets for task durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            endpoint: default_metrics_endpoint(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

// Default value functions
fn default_metrics_enabled() -> bool {
    false
}

fn default_metrics_endpoint() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_duration_buckets() -> Vec<f64> {
    // Dumps run from seconds to hours.
    vec![1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0]
}

/// Handle to the installed recorder.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry with no recorder installed.
    pub fn disabled() -> Self {
        Self {
            prometheus_handle: None,
        }
    }

    /// Whether a recorder was installed.
    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Initialize the metrics subsystem.
///
/// When enabled, installs the Prometheus recorder and its HTTP listener on
/// `config.endpoint`. Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the endpoint is invalid or the recorder cannot be installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let addr: SocketAddr = config.endpoint.parse()?;

    let mut builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", service_name);

    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;

    register_metric_descriptions();

    tracing::info!(
        service_name = %service_name,
        endpoint = %config.endpoint,
        "Metrics initialized"
    );

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    describe_counter!("dbvault_tasks_total", "Total number of tasks processed by outcome");
    describe_histogram!(
        "dbvault_task_duration_seconds",
        "Task handler duration in seconds"
    );
    describe_counter!("dbvault_tool_runs_total", "External tool invocations");
    describe_gauge!("dbvault_queue_depth", "Pending tasks per lane");
    describe_gauge!("dbvault_active_tasks", "Tasks currently being handled");
    describe_counter!("dbvault_errors_total", "Errors constructed, by code");
}

/// Task lifecycle metrics.
pub struct TaskMetrics;

impl TaskMetrics {
    /// Record a task that finished successfully.
    pub fn record_completed(task_type: &str, duration_seconds: f64) {
        counter!(
            "dbvault_tasks_total",
            "type" => task_type.to_string(),
            "status" => "completed",
        )
        .increment(1);
        histogram!("dbvault_task_duration_seconds", "type" => task_type.to_string())
            .record(duration_seconds);
    }

    /// Record a failed attempt; `status` is `retry` or `archived`.
    pub fn record_failed(task_type: &str, status: &'static str, duration_seconds: f64) {
        counter!(
            "dbvault_tasks_total",
            "type" => task_type.to_string(),
            "status" => status,
        )
        .increment(1);
        histogram!("dbvault_task_duration_seconds", "type" => task_type.to_string())
            .record(duration_seconds);
    }

    pub fn task_started() {
        gauge!("dbvault_active_tasks").increment(1.0);
    }

    pub fn task_finished() {
        gauge!("dbvault_active_tasks").decrement(1.0);
    }
}

/// External tool metrics.
pub struct ToolMetrics;

impl ToolMetrics {
    pub fn record_run(tool: &str, success: bool) {
        counter!(
            "dbvault_tool_runs_total",
            "tool" => tool.to_string(),
            "success" => success.to_string(),
        )
        .increment(1);
    }
}

/// Queue depth gauge.
pub struct QueueDepthGauge;

impl QueueDepthGauge {
    pub fn set(queue: &str, pending: u64) {
        gauge!("dbvault_queue_depth", "queue" => queue.to_string()).set(pending as f64);
    }
}
