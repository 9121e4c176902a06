//! Periodic promotion of due scheduled/retry tasks and retention sweeps.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::queue::JobQueue;

/// Background loop that moves due tasks to `pending` and drops expired
/// completed tasks.
pub struct Forwarder {
    queue: Arc<JobQueue>,
    interval: Duration,
}

impl Forwarder {
    pub fn new(queue: Arc<JobQueue>, interval: Duration) -> Self {
        Self { queue, interval }
    }

    /// Run one forwarding pass. Returns (promoted, swept).
    pub async fn tick(&self) -> (usize, usize) {
        let now = Utc::now();
        let promoted = match self.queue.forward_due(now).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to forward due tasks");
                0
            }
        };
        let swept = match self.queue.sweep_completed(now).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to sweep completed tasks");
                0
            }
        };
        if promoted > 0 || swept > 0 {
            tracing::debug!(promoted, swept, "Forwarder pass");
        }
        (promoted, swept)
    }

    /// Spawn the loop; it exits when `shutdown` is cancelled.
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_ms = self.interval.as_millis() as u64, "Forwarder started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            tracing::info!("Forwarder stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::task::{EnqueueOptions, TaskState};

    #[tokio::test]
    async fn test_tick_promotes_past_due_scheduled() {
        let queue = Arc::new(JobQueue::in_memory());
        let task = queue
            .enqueue_at(
                "t",
                &serde_json::json!({}),
                Utc::now() + chrono::Duration::milliseconds(20),
                EnqueueOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(task.state, TaskState::Scheduled);

        let forwarder = Forwarder::new(queue.clone(), Duration::from_millis(10));
        assert_eq!(forwarder.tick().await, (0, 0));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(forwarder.tick().await.0, 1);
        assert_eq!(queue.get_by_id(&task.id).await.unwrap().state, TaskState::Pending);
    }
}
