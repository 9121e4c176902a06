//! Health checkers for the broker, the backup store and the dump tools.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::check::ComponentHealth;
use crate::backup::BackupStore;
use crate::executor::ToolRegistry;
use crate::jobs::JobQueue;

/// Trait for health checkers.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// The component name.
    fn name(&self) -> &str;

    async fn check(&self) -> ComponentHealth;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Broker
// ═══════════════════════════════════════════════════════════════════════════════

/// Pings the broker and enumerates its queues.
pub struct QueueHealthChecker {
    queue: Arc<JobQueue>,
}

impl QueueHealthChecker {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl HealthChecker for QueueHealthChecker {
    fn name(&self) -> &str {
        "broker"
    }

    async fn check(&self) -> ComponentHealth {
        let start = Instant::now();
        let result = self.queue.health_check().await;
        if let Err(e) = &result {
            warn!(error = %e, "Broker health check failed");
        }
        let mut health = ComponentHealth::from_result(self.name(), result, start.elapsed());

        if health.is_healthy() {
            if let Ok(names) = self.queue.queue_names().await {
                health = health.with_metadata("queues", names);
            }
        }
        health
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backup store
// ═══════════════════════════════════════════════════════════════════════════════

pub struct StoreHealthChecker {
    store: Arc<dyn BackupStore>,
}

impl StoreHealthChecker {
    pub fn new(store: Arc<dyn BackupStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthChecker for StoreHealthChecker {
    fn name(&self) -> &str {
        "store"
    }

    async fn check(&self) -> ComponentHealth {
        let start = Instant::now();
        let result = self.store.ping().await;
        ComponentHealth::from_result(self.name(), result, start.elapsed())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dump and compression tools
// ═══════════════════════════════════════════════════════════════════════════════

/// Reports which external binaries were located at startup.
///
/// Some tools missing is degraded (the worker still serves jobs that do not
/// need them); nothing located at all is unhealthy.
pub struct ToolsHealthChecker {
    tools: Arc<ToolRegistry>,
}

impl ToolsHealthChecker {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl HealthChecker for ToolsHealthChecker {
    fn name(&self) -> &str {
        "tools"
    }

    async fn check(&self) -> ComponentHealth {
        let start = Instant::now();
        let result = self.tools.validate_tools_available();
        let latency = start.elapsed();

        let available: Vec<String> = self
            .tools
            .available()
            .into_iter()
            .map(|(tool, _)| tool.to_string())
            .collect();

        match result {
            Ok(()) => ComponentHealth::healthy(self.name())
                .with_latency(latency)
                .with_metadata("available", available),
            Err(e) => {
                let missing: Vec<String> =
                    self.tools.missing().iter().map(ToString::to_string).collect();
                debug!(missing = ?missing, "Some tools are not installed");
                let health = if available.is_empty() {
                    ComponentHealth::unhealthy(self.name()).with_error(e.to_string())
                } else {
                    ComponentHealth::degraded(self.name()).with_message(e.to_string())
                };
                health
                    .with_latency(latency)
                    .with_metadata("available", available)
                    .with_metadata("missing", missing)
            }
        }
    }
}
