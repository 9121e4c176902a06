//! Worker runtime scenarios against the in-memory broker.
//!
//! Tests cover:
//! - Completion, retry and archival outcomes
//! - Deadline enforcement
//! - Weighted lane priority
//! - Paused lanes
//! - Graceful shutdown

use async_trait::async_trait;
use chrono::Utc;
use dbvault_core::jobs::{
    BackoffStrategy, EnqueueOptions, JobQueue, JobWorker, RetryPolicy, TaskContext, TaskError,
    TaskHandler, TaskState, WorkerConfig,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TASK: &str = "test:run";

fn config(concurrency: usize) -> WorkerConfig {
    WorkerConfig {
        concurrency,
        poll_interval: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(5),
        retry_policy: RetryPolicy::with_backoff(BackoffStrategy::Fixed { delay_secs: 0 }),
        ..WorkerConfig::default()
    }
}

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

async fn task_state(queue: &JobQueue, id: &dbvault_core::jobs::TaskId) -> TaskState {
    queue.get_by_id(id).await.map(|t| t.state).unwrap_or(TaskState::Pending)
}

/// Fails the first `failures` attempts, then succeeds.
struct Flaky {
    failures: u32,
    retryable: bool,
    calls: AtomicU32,
}

#[async_trait]
impl TaskHandler for Flaky {
    async fn handle(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(if self.retryable {
                TaskError::retryable(format!("attempt {} failed", call + 1))
            } else {
                TaskError::skip_retry("bad input").with_code("INVALID_OPTIONS")
            });
        }
        Ok(())
    }
}

struct Sleeper(Duration);

#[async_trait]
impl TaskHandler for Sleeper {
    async fn handle(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

/// Records the lane of every task it sees.
struct Recorder(Mutex<Vec<String>>);

#[async_trait]
impl TaskHandler for Recorder {
    async fn handle(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        self.0.lock().push(ctx.task.queue.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_successful_task_is_completed() {
    let queue = Arc::new(JobQueue::in_memory());
    let handler = Arc::new(Flaky { failures: 0, retryable: true, calls: AtomicU32::new(0) });
    let task = queue.enqueue_now(TASK, &json!({"n": 1}), EnqueueOptions::new()).await.unwrap();

    let worker = JobWorker::new(queue.clone(), config(2)).handle(TASK, handler.clone()).start();
    wait_for(|| async { task_state(&queue, &task.id).await == TaskState::Completed }).await;

    assert_eq!(worker.stats().succeeded(), 1);
    let done = queue.get_by_id(&task.id).await.unwrap();
    assert!(done.completed_at.is_some());
    worker.stop().await;
}

#[tokio::test]
async fn test_retryable_error_goes_to_retry_then_succeeds() {
    let queue = Arc::new(JobQueue::in_memory());
    let handler = Arc::new(Flaky { failures: 1, retryable: true, calls: AtomicU32::new(0) });
    let task = queue
        .enqueue_now(TASK, &json!({}), EnqueueOptions::new().max_retry(3))
        .await
        .unwrap();

    let worker = JobWorker::new(queue.clone(), config(1)).handle(TASK, handler.clone()).start();
    wait_for(|| async { task_state(&queue, &task.id).await == TaskState::Retry }).await;

    let retrying = queue.get_by_id(&task.id).await.unwrap();
    assert_eq!(retrying.retried, 1);
    assert!(retrying.last_error.as_deref().unwrap().contains("attempt 1 failed"));
    assert!(retrying.last_failed_at.is_some());

    // The forwarder is not running; promote by hand.
    assert_eq!(queue.forward_due(Utc::now() + chrono::Duration::seconds(1)).await.unwrap(), 1);
    wait_for(|| async { task_state(&queue, &task.id).await == TaskState::Completed }).await;

    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    worker.stop().await;
}

#[tokio::test]
async fn test_retryable_error_without_budget_archives() {
    let queue = Arc::new(JobQueue::in_memory());
    let handler = Arc::new(Flaky { failures: 5, retryable: true, calls: AtomicU32::new(0) });
    let task = queue
        .enqueue_now(TASK, &json!({}), EnqueueOptions::new().max_retry(0))
        .await
        .unwrap();

    let worker = JobWorker::new(queue.clone(), config(1)).handle(TASK, handler).start();
    wait_for(|| async { task_state(&queue, &task.id).await == TaskState::Archived }).await;
    assert_eq!(worker.stats().failed(), 1);
    worker.stop().await;
}

#[tokio::test]
async fn test_skip_retry_archives_immediately() {
    let queue = Arc::new(JobQueue::in_memory());
    let handler = Arc::new(Flaky { failures: 1, retryable: false, calls: AtomicU32::new(0) });
    let task = queue
        .enqueue_now(TASK, &json!({}), EnqueueOptions::new().max_retry(5))
        .await
        .unwrap();

    let worker = JobWorker::new(queue.clone(), config(1)).handle(TASK, handler.clone()).start();
    wait_for(|| async { task_state(&queue, &task.id).await == TaskState::Archived }).await;

    let archived = queue.get_by_id(&task.id).await.unwrap();
    assert_eq!(archived.retried, 0);
    assert!(archived.last_error.unwrap().contains("INVALID_OPTIONS"));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    worker.stop().await;
}

#[tokio::test]
async fn test_unregistered_type_is_archived() {
    let queue = Arc::new(JobQueue::in_memory());
    let task = queue.enqueue_now("nobody:handles", &json!({}), EnqueueOptions::new()).await.unwrap();

    let worker = JobWorker::new(queue.clone(), config(1)).start();
    wait_for(|| async { task_state(&queue, &task.id).await == TaskState::Archived }).await;

    let archived = queue.get_by_id(&task.id).await.unwrap();
    assert!(archived.last_error.unwrap().contains("no handler registered"));
    worker.stop().await;
}

#[tokio::test]
async fn test_handler_past_its_timeout_is_a_retryable_timeout() {
    let queue = Arc::new(JobQueue::in_memory());
    let task = queue
        .enqueue_now(
            TASK,
            &json!({}),
            EnqueueOptions::new().timeout(Duration::from_millis(50)).max_retry(0),
        )
        .await
        .unwrap();

    let worker = JobWorker::new(queue.clone(), config(1))
        .handle(TASK, Arc::new(Sleeper(Duration::from_secs(10))))
        .start();
    wait_for(|| async { task_state(&queue, &task.id).await == TaskState::Archived }).await;

    let archived = queue.get_by_id(&task.id).await.unwrap();
    assert!(archived.last_error.unwrap().contains("TOOL_TIMEOUT"));
    worker.stop().await;
}

#[tokio::test]
async fn test_critical_lane_served_before_low() {
    let queue = Arc::new(JobQueue::in_memory());
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));

    queue.enqueue_now(TASK, &json!({"n": 1}), EnqueueOptions::new().queue("low")).await.unwrap();
    queue.enqueue_now(TASK, &json!({"n": 2}), EnqueueOptions::new().queue("critical")).await.unwrap();

    let worker = JobWorker::new(queue.clone(), config(1)).handle(TASK, recorder.clone()).start();
    wait_for(|| async { recorder.0.lock().len() == 2 }).await;

    assert_eq!(*recorder.0.lock(), vec!["critical".to_string(), "low".to_string()]);
    worker.stop().await;
}

#[tokio::test]
async fn test_paused_lane_is_not_consumed() {
    let queue = Arc::new(JobQueue::in_memory());
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let task = queue.enqueue_now(TASK, &json!({}), EnqueueOptions::new()).await.unwrap();
    queue.pause("default").await.unwrap();

    let worker = JobWorker::new(queue.clone(), config(1)).handle(TASK, recorder.clone()).start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(recorder.0.lock().is_empty());
    assert_eq!(task_state(&queue, &task.id).await, TaskState::Pending);

    queue.resume("default").await.unwrap();
    wait_for(|| async { task_state(&queue, &task.id).await == TaskState::Completed }).await;
    worker.stop().await;
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_task() {
    let queue = Arc::new(JobQueue::in_memory());
    let task = queue.enqueue_now(TASK, &json!({}), EnqueueOptions::new()).await.unwrap();

    let worker = JobWorker::new(queue.clone(), config(1))
        .handle(TASK, Arc::new(Sleeper(Duration::from_millis(200))))
        .start();
    wait_for(|| async { task_state(&queue, &task.id).await == TaskState::Active }).await;

    worker.stop().await;
    assert_eq!(task_state(&queue, &task.id).await, TaskState::Completed);
}
