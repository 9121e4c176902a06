//! Worker-side handlers for backup and restore tasks.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use super::model::{BackupFile, BackupJob, BackupStatus, BackupType, DatabaseEngine};
use super::store::BackupStore;
use crate::error::{ErrorCode, Result, VaultError};
use crate::executor::{
    args, BackupOptions, BackupResult, ProcessExecutor, ProgressCallback, ProgressUpdate,
    RestoreOptions,
};
use crate::jobs::{TaskContext, TaskError, TaskHandler};

/// Task type for backups.
pub const BACKUP_TASK: &str = "backup:execute";

/// Task type for restores.
pub const RESTORE_TASK: &str = "restore:execute";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPayload {
    pub backup_job_id: Uuid,
    pub connection_id: Uuid,
    pub engine: DatabaseEngine,
    pub backup_type: BackupType,
    #[serde(default)]
    pub options: BackupOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorePayload {
    pub backup_job_id: Uuid,
    /// Connection to restore into
    pub connection_id: Uuid,
    /// Overrides the connection's database
    #[serde(default)]
    pub target_database: Option<String>,
    pub artifact: PathBuf,
    #[serde(default)]
    pub options: RestoreOptions,
}

/// Domain failures never re-run automatically.
fn fatal(error: &VaultError) -> TaskError {
    TaskError::skip_retry(error.user_message()).with_code(error.error_code())
}

/// Timeouts go back through the queue while the task has budget left.
fn attempt_error(error: &VaultError, ctx: &TaskContext) -> TaskError {
    if error.code() == ErrorCode::ToolTimeout && ctx.task.has_retry_budget() {
        TaskError::retryable(error.user_message()).with_code(error.error_code())
    } else {
        fatal(error)
    }
}

/// Lookups fail permanently on not-found, transiently otherwise.
fn lookup_error(error: VaultError) -> TaskError {
    if error.is_not_found() {
        fatal(&error)
    } else {
        TaskError::from(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backup
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs `backup:execute` tasks and writes the outcome onto the job.
pub struct BackupTaskHandler {
    store: Arc<dyn BackupStore>,
    executor: Arc<ProcessExecutor>,
    artifact_retention: Option<Duration>,
}

impl BackupTaskHandler {
    pub fn new(store: Arc<dyn BackupStore>, executor: Arc<ProcessExecutor>) -> Self {
        Self {
            store,
            executor,
            artifact_retention: None,
        }
    }

    pub fn with_artifact_retention(mut self, retention: Duration) -> Self {
        self.artifact_retention = Some(retention);
        self
    }

    /// Bring the job to `running`. `Ok(None)` means there is nothing to do.
    async fn begin(&self, job_id: Uuid, ctx: &TaskContext) -> std::result::Result<Option<BackupJob>, TaskError> {
        let mut job = self.store.load_job(job_id).await.map_err(lookup_error)?;
        let now = Utc::now();

        match job.status {
            BackupStatus::Cancelled | BackupStatus::Completed => {
                tracing::info!(job_uid = %job.uid, status = %job.status, "Skipping backup task for finished job");
                return Ok(None);
            }
            // The previous attempt died mid-run: a crashed worker whose task
            // was forced back to pending, or a timed-out attempt being retried
            BackupStatus::Running => {
                tracing::warn!(job_uid = %job.uid, retried = ctx.task.retried, "Resuming interrupted backup");
                job.fail("interrupted", "INTERRUPTED", now).map_err(|e| fatal(&e))?;
                job.retry(now).map_err(|e| fatal(&e))?;
            }
            // A queue-driven retry of an attempt that failed
            BackupStatus::Failed if ctx.task.retried > 0 => {
                job.retry(now).map_err(|e| fatal(&e))?;
            }
            _ => {}
        }

        job.start(now).map_err(|e| fatal(&e))?;
        self.store.save_job(&job).await?;
        Ok(Some(job))
    }

    async fn execute(&self, job: &BackupJob, payload: &BackupPayload, ctx: &TaskContext) -> Result<BackupResult> {
        let connection = self.store.load_connection(payload.connection_id).await?;
        if connection.engine != payload.engine {
            return Err(VaultError::invalid_options(format!(
                "connection {} is {}, task expects {}",
                connection.id, connection.engine, payload.engine
            )));
        }

        let mut options = payload.options.clone();
        payload.backup_type.apply(&mut options)?;
        options.file_stem = Some(job.uid.clone());

        let (tx, mut rx) = watch::channel(None::<ProgressUpdate>);
        options.progress = Some(ProgressCallback::new(move |percent, step| {
            let _ = tx.send(Some(ProgressUpdate {
                percent,
                step: step.to_string(),
            }));
        }));

        let store = self.store.clone();
        let job_id = job.id;
        let persister = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let update = rx.borrow_and_update().clone();
                if let Some(update) = update {
                    if let Err(e) = store.update_progress(job_id, update.percent, &update.step).await {
                        tracing::warn!(error = %e, "Failed to persist progress");
                    }
                }
            }
        });

        let params = connection.params();
        let outcome = tokio::time::timeout_at(ctx.work_deadline(), self.executor.backup(&params, &options)).await;

        // Closing the channel ends the persister
        drop(options);
        let _ = persister.await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(VaultError::tool_timeout(
                args::dump_tool(payload.engine).binary_name(),
                ctx.task.timeout.as_secs(),
            )),
        }
    }
}

#[async_trait]
impl TaskHandler for BackupTaskHandler {
    async fn handle(&self, ctx: &TaskContext) -> std::result::Result<(), TaskError> {
        let payload: BackupPayload = ctx.task.payload_as().map_err(|e| fatal(&e))?;
        let Some(job) = self.begin(payload.backup_job_id, ctx).await? else {
            return Ok(());
        };
        tracing::info!(job_uid = %job.uid, engine = %payload.engine, "Backup started");

        let outcome = self.execute(&job, &payload, ctx).await;

        // Reload: progress was persisted underneath, and the job may have been cancelled
        let mut job = self.store.load_job(job.id).await?;
        let now = Utc::now();

        if job.status == BackupStatus::Cancelled {
            tracing::info!(job_uid = %job.uid, "Backup cancelled while running, discarding result");
            if let Ok(result) = &outcome {
                if let Err(e) = tokio::fs::remove_file(&result.path).await {
                    tracing::warn!(path = %result.path.display(), error = %e, "Failed to remove discarded artifact");
                }
            }
            return Ok(());
        }

        match outcome {
            Ok(result) => {
                let file = BackupFile::from_result(job.id, &result, self.artifact_retention, now);
                job.complete(&result, Some(file), now).map_err(|e| fatal(&e))?;
                self.store.save_job(&job).await?;
                tracing::info!(
                    job_uid = %job.uid,
                    path = %result.path.display(),
                    original_size = result.original_size,
                    tables = result.tables.len(),
                    "Backup completed"
                );
                Ok(())
            }
            Err(error) => {
                job.fail(error.user_message(), error.error_code(), now)
                    .map_err(|e| fatal(&e))?;
                self.store.save_job(&job).await?;
                tracing::warn!(job_uid = %job.uid, code = error.error_code(), error = %error, "Backup failed");
                Err(attempt_error(&error, ctx))
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Restore
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs `restore:execute` tasks.
pub struct RestoreTaskHandler {
    store: Arc<dyn BackupStore>,
    executor: Arc<ProcessExecutor>,
}

impl RestoreTaskHandler {
    pub fn new(store: Arc<dyn BackupStore>, executor: Arc<ProcessExecutor>) -> Self {
        Self { store, executor }
    }
}

#[async_trait]
impl TaskHandler for RestoreTaskHandler {
    async fn handle(&self, ctx: &TaskContext) -> std::result::Result<(), TaskError> {
        let payload: RestorePayload = ctx.task.payload_as().map_err(|e| fatal(&e))?;
        let connection = self
            .store
            .load_connection(payload.connection_id)
            .await
            .map_err(lookup_error)?;
        let params = match &payload.target_database {
            Some(database) => connection.params_for(database.clone()),
            None => connection.params(),
        };

        let mut options = payload.options.clone();
        let job_id = payload.backup_job_id;
        options.progress = Some(ProgressCallback::new(move |percent, step| {
            tracing::debug!(backup_job_id = %job_id, percent, step, "Restore progress");
        }));

        tracing::info!(
            backup_job_id = %payload.backup_job_id,
            database = %params.database,
            artifact = %payload.artifact.display(),
            "Restore started"
        );

        let outcome = tokio::time::timeout_at(
            ctx.work_deadline(),
            self.executor.restore(&params, &payload.artifact, &options),
        )
        .await
        .unwrap_or_else(|_| {
            Err(VaultError::tool_timeout(
                format!("{} restore", params.engine),
                ctx.task.timeout.as_secs(),
            ))
        });

        match outcome {
            Ok(()) => {
                tracing::info!(backup_job_id = %payload.backup_job_id, database = %params.database, "Restore completed");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(backup_job_id = %payload.backup_job_id, code = error.error_code(), error = %error, "Restore failed");
                Err(attempt_error(&error, ctx))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::model::DatabaseConnection;
    use crate::backup::store::InMemoryBackupStore;
    use crate::executor::ToolRegistry;
    use crate::jobs::{EnqueueOptions, JobQueue};

    async fn setup() -> (Arc<InMemoryBackupStore>, BackupTaskHandler, BackupJob, DatabaseConnection, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryBackupStore::new());
        let executor = Arc::new(ProcessExecutor::new(Arc::new(ToolRegistry::from_paths([])), dir.path()));
        let handler = BackupTaskHandler::new(store.clone(), executor);
        let conn = DatabaseConnection::new("main", DatabaseEngine::Postgres, "localhost", "postgres", "app");
        store.save_connection(&conn).await.unwrap();
        let job = BackupJob::create(conn.id, BackupType::Full, BackupOptions::default(), None, Utc::now());
        store.save_job(&job).await.unwrap();
        (store, handler, job, conn, dir)
    }

    async fn context_for(payload: &BackupPayload) -> TaskContext {
        let queue = JobQueue::in_memory();
        let task = queue
            .enqueue_now(BACKUP_TASK, payload, EnqueueOptions::new())
            .await
            .unwrap();
        let deadline = Utc::now() + chrono::Duration::seconds(30);
        TaskContext::new(task, deadline)
    }

    #[tokio::test]
    async fn test_missing_tool_fails_job_without_retry() {
        let (store, handler, job, conn, dir) = setup().await;
        let payload = BackupPayload {
            backup_job_id: job.id,
            connection_id: conn.id,
            engine: DatabaseEngine::Postgres,
            backup_type: BackupType::Full,
            options: BackupOptions::default(),
        };
        let ctx = context_for(&payload).await;

        let err = handler.handle(&ctx).await.unwrap_err();
        assert!(!err.retryable);
        assert_eq!(err.code.as_deref(), Some("TOOL_NOT_FOUND"));

        let job = store.load_job(job.id).await.unwrap();
        assert_eq!(job.status, BackupStatus::Failed);
        assert_eq!(job.error_code.as_deref(), Some("TOOL_NOT_FOUND"));
        assert!(job.original_size.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_job_is_skipped() {
        let (store, handler, mut job, conn, _dir) = setup().await;
        job.cancel(Utc::now()).unwrap();
        store.save_job(&job).await.unwrap();
        let payload = BackupPayload {
            backup_job_id: job.id,
            connection_id: conn.id,
            engine: DatabaseEngine::Postgres,
            backup_type: BackupType::Full,
            options: BackupOptions::default(),
        };
        handler.handle(&context_for(&payload).await).await.unwrap();
        assert_eq!(store.load_job(job.id).await.unwrap().status, BackupStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_unknown_job_archives() {
        let (_store, handler, _job, conn, _dir) = setup().await;
        let payload = BackupPayload {
            backup_job_id: Uuid::new_v4(),
            connection_id: conn.id,
            engine: DatabaseEngine::Postgres,
            backup_type: BackupType::Full,
            options: BackupOptions::default(),
        };
        let err = handler.handle(&context_for(&payload).await).await.unwrap_err();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_job_left_running_is_restarted() {
        let (store, handler, mut job, conn, _dir) = setup().await;
        job.start(Utc::now()).unwrap();
        job.update_progress(40.0, "Dumping table public.users", Utc::now());
        store.save_job(&job).await.unwrap();
        let payload = BackupPayload {
            backup_job_id: job.id,
            connection_id: conn.id,
            engine: DatabaseEngine::Postgres,
            backup_type: BackupType::Full,
            options: BackupOptions::default(),
        };

        // First delivery of the task, as after an operator forced it back to pending
        let ctx = context_for(&payload).await;
        assert_eq!(ctx.task.retried, 0);
        let err = handler.handle(&ctx).await.unwrap_err();

        // The attempt reached the executor instead of tripping on the stale status
        assert_eq!(err.code.as_deref(), Some("TOOL_NOT_FOUND"));
        let job = store.load_job(job.id).await.unwrap();
        assert_eq!(job.status, BackupStatus::Failed);
        assert_eq!(job.error_code.as_deref(), Some("TOOL_NOT_FOUND"));
    }
}
