//! Task definitions.
//!
//! This module provides the queue's view of a unit of work:
//!
//! - **TaskId / TaskState**: identity and state bucket of a task
//! - **TaskInfo**: the broker record, decoupled from any domain row
//! - **EnqueueOptions**: lane, retry budget, timeout, deadline, uniqueness
//! - **TaskError**: handler failure, retryable or skip-retry
//! - **RetryPolicy**: backoff strategies for queue-level retries

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ErrorCode, Result, VaultError};

/// Default lane for tasks enqueued without one.
pub const DEFAULT_QUEUE: &str = "default";

/// Default retry budget.
pub const DEFAULT_MAX_RETRY: u32 = 3;

/// Default time a completed task stays inspectable.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Opaque key/value payload carried by a task.
pub type Payload = serde_json::Map<String, serde_json::Value>;

// ═══════════════════════════════════════════════════════════════════════════════
// Task Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Queue-assigned identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| VaultError::task_not_found(s))
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Task State
// ═══════════════════════════════════════════════════════════════════════════════

/// State bucket a task currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Ready to be picked up
    Pending,
    /// Held by a worker
    Active,
    /// Waiting for its run time
    Scheduled,
    /// Failed, waiting for its backoff to elapse
    Retry,
    /// Failed with no retry left
    Archived,
    /// Finished, kept until retention elapses
    Completed,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        Self::Pending,
        Self::Active,
        Self::Scheduled,
        Self::Retry,
        Self::Archived,
        Self::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Scheduled => "scheduled",
            Self::Retry => "retry",
            Self::Archived => "archived",
            Self::Completed => "completed",
        }
    }

    /// Whether a worker has not picked the task up yet.
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled | Self::Retry)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = VaultError;

    /// `failed` is accepted as an alias for the archived bucket.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "scheduled" => Ok(Self::Scheduled),
            "retry" => Ok(Self::Retry),
            "archived" | "failed" => Ok(Self::Archived),
            "completed" => Ok(Self::Completed),
            other => Err(VaultError::validation(format!("unknown task state: {}", other))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Task Info
// ═══════════════════════════════════════════════════════════════════════════════

/// The broker's record of a unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: Payload,
    /// Lane the task is queued on
    pub queue: String,
    pub max_retry: u32,
    pub retried: u32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub deadline: Option<DateTime<Utc>>,
    pub state: TaskState,
    /// Run time for scheduled tasks and backoff expiry for retry tasks
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub enqueued_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

impl TaskInfo {
    /// Decode the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(serde_json::Value::Object(
            self.payload.clone(),
        ))?)
    }

    /// Whether another queue-level attempt is allowed.
    pub fn has_retry_budget(&self) -> bool {
        self.retried < self.max_retry
    }

    /// The earliest of the per-attempt timeout and the absolute deadline.
    pub fn attempt_deadline(&self, started: DateTime<Utc>) -> DateTime<Utc> {
        let by_timeout = chrono::Duration::from_std(self.timeout)
            .ok()
            .and_then(|timeout| started.checked_add_signed(timeout))
            .unwrap_or_else(|| started + chrono::Duration::days(36_500));
        match self.deadline {
            Some(deadline) if deadline < by_timeout => deadline,
            _ => by_timeout,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Enqueue Options
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-task submission options.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Lane; `default` when unset
    pub queue: Option<String>,
    /// Retry budget; [`DEFAULT_MAX_RETRY`] when unset
    pub max_retry: Option<u32>,
    /// Per-attempt timeout; the queue default when unset
    pub timeout: Option<Duration>,
    /// Absolute deadline across all attempts
    pub deadline: Option<DateTime<Utc>>,
    /// Reject duplicates of (lane, type, payload) for this long
    pub unique: Option<Duration>,
    /// How long a completed task stays inspectable
    pub retention: Option<Duration>,
    /// Explicit id; a collision is rejected
    pub task_id: Option<TaskId>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = Some(max_retry);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn unique(mut self, ttl: Duration) -> Self {
        self.unique = Some(ttl);
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn task_id(mut self, id: TaskId) -> Self {
        self.task_id = Some(id);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Task Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error returned by a task handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub message: String,
    /// Whether the queue may spend retry budget on this failure
    pub retryable: bool,
    pub code: Option<String>,
}

impl TaskError {
    /// A transient failure: retried while budget remains.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            code: None,
        }
    }

    /// A failure that archives the task immediately.
    pub fn skip_retry(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for TaskError {}

impl From<VaultError> for TaskError {
    fn from(error: VaultError) -> Self {
        Self {
            message: error.summary(),
            retryable: error.is_retryable(),
            code: Some(error.error_code().to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed { delay_secs: u64 },
    /// Linear increase in delay
    Linear {
        initial_delay_secs: u64,
        increment_secs: u64,
    },
    /// Exponential increase in delay (initial * multiplier^attempt)
    Exponential {
        initial_delay_secs: u64,
        max_delay_secs: u64,
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_secs: 5,
            max_delay_secs: 3600,
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = match self {
            Self::Fixed { delay_secs } => *delay_secs,
            Self::Linear {
                initial_delay_secs,
                increment_secs,
            } => initial_delay_secs + (increment_secs * attempt as u64),
            Self::Exponential {
                initial_delay_secs,
                max_delay_secs,
                multiplier,
            } => {
                let delay = (*initial_delay_secs as f64) * multiplier.powi(attempt as i32);
                delay.min(*max_delay_secs as f64) as u64
            }
        };

        Duration::from_secs(secs)
    }

    pub fn fixed(delay_secs: u64) -> Self {
        Self::Fixed { delay_secs }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// How the worker spends a task's retry budget.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub backoff: BackoffStrategy,
    /// Also retry errors marked skip-retry
    #[serde(default)]
    pub retry_on_any_error: bool,
}

impl RetryPolicy {
    pub fn with_backoff(backoff: BackoffStrategy) -> Self {
        Self {
            backoff,
            retry_on_any_error: false,
        }
    }

    /// Check if another attempt should be scheduled.
    pub fn should_retry(&self, task: &TaskInfo, error: &TaskError) -> bool {
        if !task.has_retry_budget() {
            return false;
        }
        self.retry_on_any_error || error.retryable
    }

    /// Delay before the next attempt of a task that has been retried `retried` times.
    pub fn next_retry_delay(&self, retried: u32) -> Duration {
        self.backoff.delay_for_attempt(retried)
    }
}

/// Build a queue error for a task found in the wrong bucket.
pub(crate) fn wrong_state(id: &TaskId, state: TaskState, action: &str) -> VaultError {
    VaultError::new(
        ErrorCode::InvalidStateTransition,
        format!("cannot {} task {} in state {}", action, id, state),
    )
    .with_context("task_id", id.to_string())
    .with_context("state", state.as_str())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(max_retry: u32, retried: u32) -> TaskInfo {
        TaskInfo {
            id: TaskId::new(),
            task_type: "backup:execute".to_string(),
            payload: Payload::new(),
            queue: DEFAULT_QUEUE.to_string(),
            max_retry,
            retried,
            timeout: Duration::from_secs(60),
            deadline: None,
            state: TaskState::Active,
            next_run_at: None,
            last_error: None,
            last_failed_at: None,
            enqueued_at: Utc::now(),
            completed_at: None,
            retention: DEFAULT_RETENTION,
        }
    }

    #[test]
    fn test_task_state_parse() {
        assert_eq!("pending".parse::<TaskState>().unwrap(), TaskState::Pending);
        assert_eq!("FAILED".parse::<TaskState>().unwrap(), TaskState::Archived);
        assert!("exploded".parse::<TaskState>().is_err());
        assert!(TaskState::Retry.is_waiting());
        assert!(!TaskState::Active.is_waiting());
    }

    #[test]
    fn test_task_id_parse_failure_is_not_found() {
        let err = "not-a-uuid".parse::<TaskId>().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_backoff_exponential() {
        let backoff = BackoffStrategy::Exponential {
            initial_delay_secs: 1,
            max_delay_secs: 100,
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(100));
    }

    #[test]
    fn test_backoff_linear() {
        let backoff = BackoffStrategy::Linear {
            initial_delay_secs: 5,
            increment_secs: 3,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(11));
    }

    #[test]
    fn test_retry_policy_respects_budget_and_skip_retry() {
        let policy = RetryPolicy::default();
        let transient = TaskError::retryable("broker hiccup");
        let fatal = TaskError::skip_retry("pg_dump exited with status 1");

        assert!(policy.should_retry(&sample(3, 0), &transient));
        assert!(policy.should_retry(&sample(3, 2), &transient));
        assert!(!policy.should_retry(&sample(3, 3), &transient));
        assert!(!policy.should_retry(&sample(3, 0), &fatal));

        let any = RetryPolicy {
            retry_on_any_error: true,
            ..RetryPolicy::default()
        };
        assert!(any.should_retry(&sample(3, 0), &fatal));
    }

    #[test]
    fn test_attempt_deadline_picks_earliest() {
        let started = Utc::now();
        let mut task = sample(0, 0);
        assert_eq!(task.attempt_deadline(started), started + chrono::Duration::seconds(60));

        let early = started + chrono::Duration::seconds(10);
        task.deadline = Some(early);
        assert_eq!(task.attempt_deadline(started), early);
    }

    #[test]
    fn test_task_error_from_vault_error() {
        let err: TaskError = VaultError::tool_not_found("pg_dump").into();
        assert!(!err.retryable);
        assert_eq!(err.code.as_deref(), Some("TOOL_NOT_FOUND"));
        assert!(err.message.contains("pg_dump"));
    }

    #[test]
    fn test_payload_as() {
        #[derive(Deserialize)]
        struct P {
            backup_job_id: i64,
        }
        let mut task = sample(0, 0);
        task.payload
            .insert("backup_job_id".to_string(), serde_json::json!(42));
        let p: P = task.payload_as().unwrap();
        assert_eq!(p.backup_job_id, 42);
    }
}
