//! Job worker for concurrent task execution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::lanes::{LaneSelector, LaneWeights};
use super::queue::JobQueue;
use super::task::{RetryPolicy, TaskError, TaskId, TaskInfo};
use crate::config::WorkerSettings;
use crate::error::Result;
use crate::telemetry::TaskMetrics;

/// Upper bound on the time reserved after a handler's work deadline.
const MAX_FINALIZE_GRACE: Duration = Duration::from_secs(5);

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent task executions
    pub concurrency: usize,
    /// Sleep between polls when every lane is empty
    pub poll_interval: Duration,
    /// Grace period for in-flight tasks on shutdown
    pub shutdown_timeout: Duration,
    /// Worker name/identifier
    pub name: String,
    /// Lanes and their relative weights
    pub lanes: LaneWeights,
    pub retry_policy: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            name: "dbvault-worker".to_string(),
            lanes: LaneWeights::default(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_settings(settings: &WorkerSettings) -> Result<Self> {
        Ok(Self {
            concurrency: settings.concurrency,
            poll_interval: settings.poll_interval,
            shutdown_timeout: settings.shutdown_timeout,
            lanes: LaneWeights::from_map(&settings.queues)?,
            ..Self::default()
        })
    }
}

/// Statistics for the job worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub processed: Arc<AtomicU64>,
    pub succeeded: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
    pub active: Arc<AtomicU64>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handler Interface
// ═══════════════════════════════════════════════════════════════════════════════

/// Context handed to a handler for one attempt.
pub struct TaskContext {
    pub task: TaskInfo,
    /// Wall-clock end of this attempt
    pub deadline_at: DateTime<Utc>,
    deadline: tokio::time::Instant,
}

impl TaskContext {
    pub fn new(task: TaskInfo, deadline_at: DateTime<Utc>) -> Self {
        let remaining = (deadline_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        Self {
            task,
            deadline_at,
            deadline: tokio::time::Instant::now() + remaining,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    /// Monotonic deadline for `tokio::time::timeout_at`.
    pub fn deadline(&self) -> tokio::time::Instant {
        self.deadline
    }

    /// Deadline for the handler's own work: slightly before [`deadline`](Self::deadline)
    /// so the handler can still record the outcome after timing out.
    pub fn work_deadline(&self) -> tokio::time::Instant {
        let remaining = self
            .deadline
            .saturating_duration_since(tokio::time::Instant::now());
        self.deadline - (remaining / 10).min(MAX_FINALIZE_GRACE)
    }

    /// Attempt number, 1-indexed.
    pub fn attempt(&self) -> u32 {
        self.task.retried + 1
    }
}

/// Processes tasks of one type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Handle one attempt. A skip-retry error archives the task.
    async fn handle(&self, ctx: &TaskContext) -> std::result::Result<(), TaskError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Worker
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown: CancellationToken,
    stats: WorkerStats,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to stop taking new tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Wait for the poll loop and the drain to finish.
    pub async fn wait(self) {
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Worker loop panicked");
        }
    }

    /// Shut down and wait.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}

struct WorkerInner {
    queue: Arc<JobQueue>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    retry_policy: RetryPolicy,
    stats: WorkerStats,
    shutdown: CancellationToken,
}

/// Fixed-size pool pulling tasks from weighted lanes.
pub struct JobWorker {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    stats: WorkerStats,
}

impl JobWorker {
    pub fn new(queue: Arc<JobQueue>, config: WorkerConfig) -> Self {
        Self {
            config,
            queue,
            handlers: HashMap::new(),
            stats: WorkerStats::new(),
        }
    }

    /// Bind a handler to a task type.
    pub fn handle(mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    /// Start the worker, returning a handle for control.
    pub fn start(self) -> WorkerHandle {
        let shutdown = CancellationToken::new();
        let stats = self.stats.clone();
        let config = self.config;
        let inner = Arc::new(WorkerInner {
            queue: self.queue,
            handlers: self.handlers,
            retry_policy: config.retry_policy.clone(),
            stats: self.stats,
            shutdown: shutdown.clone(),
        });

        let join = tokio::spawn(run_loop(inner, config));

        WorkerHandle {
            shutdown,
            stats,
            join,
        }
    }
}

async fn run_loop(inner: Arc<WorkerInner>, config: WorkerConfig) {
    let concurrency = config.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut selector = LaneSelector::new(config.lanes.clone());

    tracing::info!(
        worker = %config.name,
        concurrency,
        lanes = ?config.lanes.names().collect::<Vec<_>>(),
        "Job worker started"
    );

    loop {
        let permit = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        match poll_lanes(&inner.queue, &mut selector).await {
            Ok(Some(task)) => {
                let inner = inner.clone();
                tokio::spawn(async move { inner.process(task, permit).await });
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }
            }
            Err(e) => {
                drop(permit);
                tracing::error!(worker = %config.name, error = %e, "Failed to dequeue");
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }
            }
        }
    }

    tracing::info!(worker = %config.name, "Worker shutting down");
    let drain = semaphore.acquire_many(concurrency as u32);
    match tokio::time::timeout(config.shutdown_timeout, drain).await {
        Ok(_) => tracing::info!(worker = %config.name, "Worker stopped"),
        Err(_) => tracing::warn!(
            worker = %config.name,
            in_flight = inner.stats.active(),
            "Shutdown timeout elapsed with tasks still running"
        ),
    };
}

/// Try each lane in weighted order; the first available task wins.
async fn poll_lanes(queue: &JobQueue, selector: &mut LaneSelector) -> Result<Option<TaskInfo>> {
    for lane in selector.next_order() {
        if let Some(task) = queue.dequeue(&lane).await? {
            return Ok(Some(task));
        }
    }
    Ok(None)
}

impl WorkerInner {
    async fn process(&self, task: TaskInfo, permit: OwnedSemaphorePermit) {
        let span = tracing::info_span!(
            "task",
            task_id = %task.id,
            task_type = %task.task_type,
            queue = %task.queue,
            attempt = task.retried + 1
        );
        self.process_attempt(task).instrument(span).await;
        drop(permit);
    }

    async fn process_attempt(&self, task: TaskInfo) {
        self.stats.active.fetch_add(1, Ordering::Relaxed);
        TaskMetrics::task_started();
        let clock = Instant::now();

        let outcome = self.run_handler(&task).await;
        let elapsed = clock.elapsed().as_secs_f64();

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        let recorded = match outcome {
            Ok(()) => {
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                TaskMetrics::record_completed(&task.task_type, elapsed);
                tracing::info!(elapsed_secs = elapsed, "Task completed");
                self.queue.complete(&task).await
            }
            Err(error) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                if self.retry_policy.should_retry(&task, &error) {
                    let delay = self.retry_policy.next_retry_delay(task.retried);
                    TaskMetrics::record_failed(&task.task_type, "retry", elapsed);
                    tracing::warn!(error = %error, retry_in_secs = delay.as_secs(), "Task failed, will retry");
                    self.queue.retry(&task, &error, delay).await
                } else {
                    TaskMetrics::record_failed(&task.task_type, "archived", elapsed);
                    tracing::error!(error = %error, "Task failed, archived");
                    self.queue.archive(&task, &error).await
                }
            }
        };
        if let Err(e) = recorded {
            e.log();
        }

        self.stats.active.fetch_sub(1, Ordering::Relaxed);
        TaskMetrics::task_finished();
    }

    async fn run_handler(&self, task: &TaskInfo) -> std::result::Result<(), TaskError> {
        let Some(handler) = self.handlers.get(&task.task_type) else {
            return Err(TaskError::skip_retry(format!(
                "no handler registered for task type {}",
                task.task_type
            )));
        };

        let started = Utc::now();
        if task.deadline.map_or(false, |deadline| deadline <= started) {
            return Err(TaskError::skip_retry("task deadline exceeded before start"));
        }

        let ctx = TaskContext::new(task.clone(), task.attempt_deadline(started));
        match tokio::time::timeout_at(ctx.deadline(), handler.handle(&ctx)).await {
            Ok(result) => result,
            Err(_) => Err(TaskError::retryable(format!(
                "task exceeded its deadline of {}",
                ctx.deadline_at
            ))
            .with_code("TOOL_TIMEOUT")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.lanes, LaneWeights::default());
    }

    #[test]
    fn test_worker_config_from_settings() {
        let settings = WorkerSettings::default();
        let config = WorkerConfig::from_settings(&settings).unwrap();
        assert_eq!(config.concurrency, settings.concurrency);
        assert_eq!(config.lanes.weight("critical"), Some(6));
    }

    #[test]
    fn test_worker_stats() {
        let stats = WorkerStats::new();
        assert_eq!(stats.processed(), 0);
        assert_eq!(stats.active(), 0);

        stats.processed.fetch_add(1, Ordering::Relaxed);
        assert_eq!(stats.processed(), 1);
    }
}
