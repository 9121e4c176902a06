//! Broker connection used by every queue and task command.

use anyhow::{Context, Result};
use std::sync::Arc;

use dbvault_core::jobs::{JobQueue, QueueDefaults};
use dbvault_core::telemetry::SensitiveFieldRedactor;

/// Connected queue client plus where it points.
pub struct Broker {
    queue: Arc<JobQueue>,
    url: String,
}

impl Broker {
    /// Connect and verify the broker answers.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        let queue = JobQueue::connect_redis(url, prefix, QueueDefaults::default())
            .await
            .with_context(|| format!("Failed to connect to broker at {}", redacted(url)))?;

        Ok(Self {
            queue: Arc::new(queue),
            url: url.to_string(),
        })
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Broker URL with any password removed.
    pub fn display_url(&self) -> String {
        redacted(&self.url)
    }
}

/// Broker URL safe to print: credentials go through the shared log redactor.
pub fn redacted(url: &str) -> String {
    SensitiveFieldRedactor::global().redact_value(url)
}
