#![allow(clippy::result_large_err)]
//! # DbVault Core
//!
//! Queued database backup and restore jobs executed with the native dump
//! tools.
//!
//! ## Architecture
//!
//! - **Jobs**: Redis-backed task queue with weighted lanes, scheduling, retry
//!   with backoff and a worker runtime
//! - **Executor**: Runs `pg_dump`/`mysqldump` and friends as subprocesses,
//!   estimates progress from their output and compresses artifacts
//! - **Backup**: The backup job state machine, persistence boundary and the
//!   handlers that bridge the queue to the executor
//! - **Telemetry**: Structured logging with credential redaction and
//!   Prometheus metrics
//! - **Health**: Broker, store and tool availability checks

pub mod backup;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod health;
pub mod jobs;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, VaultError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backup::{
        BackupJob, BackupService, BackupStatus, BackupStore, BackupTaskHandler, BackupType,
        DatabaseConnection, DatabaseEngine, InMemoryBackupStore, RestoreTaskHandler,
    };
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, Result, VaultError};
    pub use crate::executor::{
        BackupOptions, BackupResult, CompressionAlgorithm, ProcessExecutor, RestoreOptions,
    };
    pub use crate::jobs::{
        EnqueueOptions, JobQueue, JobWorker, TaskError, TaskId, TaskInfo, TaskState, WorkerConfig,
    };
}
