//! Background Task Queue for DbVault.
//!
//! This module provides the queue underneath backup and restore jobs:
//!
//! - **Task**: queue-side record, options, errors and retry policy
//! - **Queue**: Redis-backed (or in-memory) lanes with state buckets
//! - **Lanes**: smooth weighted round-robin across named lanes
//! - **Worker**: concurrent handler pool with graceful shutdown
//! - **Forwarder**: promotes due scheduled/retry tasks, sweeps completed ones
//!
//! # Architecture
//!
//! ```text
//!   enqueue_now ──▶ pending ──▶ active ──▶ completed ──(retention)──▶ ∅
//!   enqueue_at ──▶ scheduled ─┘     │
//!                     ▲             ├──▶ retry ──(backoff)──▶ pending
//!                 forwarder         └──▶ archived ──(force_retry)──▶ pending
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use dbvault_core::jobs::{JobQueue, JobWorker, WorkerConfig, EnqueueOptions};
//!
//! let queue = Arc::new(JobQueue::in_memory());
//! queue.enqueue_now("backup:execute", &payload, EnqueueOptions::new().queue("critical")).await?;
//!
//! let worker = JobWorker::new(queue.clone(), WorkerConfig::default())
//!     .handle("backup:execute", Arc::new(handler))
//!     .start();
//! ```

pub mod forwarder;
pub mod lanes;
pub mod queue;
pub mod task;
pub mod worker;

pub use forwarder::Forwarder;
pub use lanes::{LaneSelector, LaneWeights};
pub use queue::{
    InMemoryQueueBackend, JobQueue, QueueBackend, QueueDefaults, QueueInfo, QueueStats,
    RedisQueueBackend, Transition,
};
pub use task::{
    BackoffStrategy, EnqueueOptions, Payload, RetryPolicy, TaskError, TaskId, TaskInfo,
    TaskState, DEFAULT_QUEUE,
};
pub use worker::{JobWorker, TaskContext, TaskHandler, WorkerConfig, WorkerHandle, WorkerStats};
