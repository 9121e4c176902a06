//! Queue lifecycle tests.
//!
//! The in-memory backend runs everywhere. The same scenario runs against
//! Redis when `DBVAULT_TEST_REDIS_URL` is set.

use chrono::Utc;
use dbvault_core::jobs::{
    EnqueueOptions, JobQueue, QueueDefaults, TaskError, TaskId, TaskState, DEFAULT_QUEUE,
};
use serde_json::json;
use std::time::Duration;
use tokio_test::assert_ok;

const BACKUP: &str = "backup:execute";
const RESTORE: &str = "restore:execute";

async fn lifecycle(queue: &JobQueue) {
    // Scheduled work is invisible to dequeue until forwarded.
    let scheduled = queue
        .enqueue_at(
            BACKUP,
            &json!({"backup_job_id": "a"}),
            Utc::now() + chrono::Duration::minutes(10),
            EnqueueOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(scheduled.state, TaskState::Scheduled);
    assert!(queue.dequeue(DEFAULT_QUEUE).await.unwrap().is_none());

    let now_task = queue
        .enqueue_now(RESTORE, &json!({"backup_job_id": "b"}), EnqueueOptions::new())
        .await
        .unwrap();

    assert_eq!(queue.list(Some(BACKUP), TaskState::Scheduled).await.unwrap().len(), 1);
    assert!(queue.list(Some(BACKUP), TaskState::Pending).await.unwrap().is_empty());
    assert_eq!(queue.list(None, TaskState::Pending).await.unwrap().len(), 1);

    // Active tasks cannot be cancelled.
    let active = queue.dequeue(DEFAULT_QUEUE).await.unwrap().unwrap();
    assert_eq!(active.id, now_task.id);
    let err = queue.cancel(&active.id).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE");

    // Archived tasks can be forced back to pending.
    queue
        .archive(&active, &TaskError::skip_retry("restore target missing"))
        .await
        .unwrap();
    let failed = queue.list(None, "failed".parse().unwrap()).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].last_error.as_deref(), Some("restore target missing"));

    let revived = queue.force_retry(&active.id).await.unwrap();
    assert_eq!(revived.state, TaskState::Pending);

    // A task stuck active (its worker died) can be forced back too, and the
    // dead worker's late outcome is ignored.
    let stuck = queue.dequeue(DEFAULT_QUEUE).await.unwrap().unwrap();
    assert_eq!(stuck.id, active.id);
    assert_eq!(queue.stats().await.unwrap().active, 1);
    let recovered = queue.force_retry(&stuck.id).await.unwrap();
    assert_eq!(recovered.state, TaskState::Pending);
    assert_eq!(queue.stats().await.unwrap().active, 0);
    queue.complete(&stuck).await.unwrap();
    assert_eq!(queue.get_by_id(&stuck.id).await.unwrap().state, TaskState::Pending);

    // Scheduled tasks can be cancelled outright.
    queue.cancel(&scheduled.id).await.unwrap();
    assert!(queue.get_by_id(&scheduled.id).await.unwrap_err().is_not_found());

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.scheduled, 0);
    assert_eq!(stats.archived, 0);
}

#[tokio::test]
async fn test_in_memory_lifecycle() {
    lifecycle(&JobQueue::in_memory()).await;
}

#[tokio::test]
async fn test_redis_lifecycle() {
    let Ok(url) = std::env::var("DBVAULT_TEST_REDIS_URL") else {
        eprintln!("DBVAULT_TEST_REDIS_URL not set, skipping");
        return;
    };
    let prefix = format!("dbvault-test-{}", uuid::Uuid::new_v4().simple());
    let queue = JobQueue::connect_redis(&url, &prefix, QueueDefaults::default())
        .await
        .unwrap();
    assert_ok!(queue.health_check().await);

    lifecycle(&queue).await;

    for name in queue.queue_names().await.unwrap() {
        queue.drop_queue(&name).await.unwrap();
    }
}

#[tokio::test]
async fn test_unknown_task_operations_are_not_found() {
    let queue = JobQueue::in_memory();
    queue.enqueue_now(BACKUP, &json!({}), EnqueueOptions::new()).await.unwrap();

    let missing = TaskId::new();
    assert_eq!(queue.get_by_id(&missing).await.unwrap_err().error_code(), "TASK_NOT_FOUND");
    assert!(queue.cancel(&missing).await.unwrap_err().is_not_found());
    assert!(queue.force_retry(&missing).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_explicit_task_id_is_kept_and_duplicates_rejected() {
    let queue = JobQueue::in_memory();
    let id = TaskId::new();
    let task = queue
        .enqueue_now(BACKUP, &json!({}), EnqueueOptions::new().task_id(id))
        .await
        .unwrap();
    assert_eq!(task.id, id);

    let dup = queue
        .enqueue_now(BACKUP, &json!({}), EnqueueOptions::new().task_id(id))
        .await
        .unwrap_err();
    assert_eq!(dup.error_code(), "TASK_EXISTS");
}

#[tokio::test]
async fn test_enqueue_defaults_apply() {
    let defaults = QueueDefaults {
        timeout: Duration::from_secs(90),
        max_retry: 7,
        retention: Duration::from_secs(10),
    };
    let queue = JobQueue::new(
        std::sync::Arc::new(dbvault_core::jobs::InMemoryQueueBackend::new()),
        defaults,
    );
    let task = queue.enqueue_now(BACKUP, &json!({}), EnqueueOptions::new()).await.unwrap();
    assert_eq!(task.timeout, Duration::from_secs(90));
    assert_eq!(task.max_retry, 7);
    assert_eq!(task.retention, Duration::from_secs(10));
    assert_eq!(task.queue, DEFAULT_QUEUE);

    let custom = queue
        .enqueue_now(BACKUP, &json!({}), EnqueueOptions::new().max_retry(0).queue("critical"))
        .await
        .unwrap();
    assert_eq!(custom.max_retry, 0);
    assert!(!custom.has_retry_budget());
}

#[tokio::test]
async fn test_enqueue_at_in_the_past_is_pending() {
    let queue = JobQueue::in_memory();
    let task = queue
        .enqueue_at(
            BACKUP,
            &json!({}),
            Utc::now() - chrono::Duration::minutes(1),
            EnqueueOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert!(task.next_run_at.is_none());
    assert_eq!(queue.dequeue(DEFAULT_QUEUE).await.unwrap().unwrap().id, task.id);
}
