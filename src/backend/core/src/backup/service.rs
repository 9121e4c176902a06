//! Request-side operations on backup jobs.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use super::handler::{BackupPayload, RestorePayload, BACKUP_TASK, RESTORE_TASK};
use super::model::{BackupJob, BackupStatus, DatabaseEngine, ProgressReport};
use super::store::BackupStore;
use crate::config::ExecutorConfig;
use crate::error::{Result, VaultError};
use crate::executor::{args, CompressionAlgorithm, RestoreOptions};
use crate::jobs::{EnqueueOptions, JobQueue, TaskId, TaskInfo, TaskState};

/// Where a restore goes.
#[derive(Debug, Clone, Default)]
pub struct RestoreTarget {
    /// Defaults to the job's own connection
    pub connection_id: Option<Uuid>,
    /// Defaults to the connection's database
    pub database: Option<String>,
}

/// Submits, cancels, retries and reports on backup jobs.
pub struct BackupService {
    queue: Arc<JobQueue>,
    store: Arc<dyn BackupStore>,
    /// Job UID to the most recently submitted task
    correlation: DashMap<String, TaskId>,
    default_compression: Option<CompressionAlgorithm>,
}

impl BackupService {
    pub fn new(queue: Arc<JobQueue>, store: Arc<dyn BackupStore>) -> Self {
        Self {
            queue,
            store,
            correlation: DashMap::new(),
            default_compression: None,
        }
    }

    /// Service with the executor section's defaults applied.
    pub fn from_config(queue: Arc<JobQueue>, store: Arc<dyn BackupStore>, config: &ExecutorConfig) -> Result<Self> {
        Ok(Self::new(queue, store).with_default_compression(config.default_algorithm()?))
    }

    /// Compression applied when a job's options leave it unset.
    pub fn with_default_compression(mut self, algorithm: Option<CompressionAlgorithm>) -> Self {
        self.default_compression = algorithm;
        self
    }

    pub fn store(&self) -> &Arc<dyn BackupStore> {
        &self.store
    }

    /// Task last submitted for a job, if this process submitted one.
    pub fn task_for(&self, job_uid: &str) -> Option<TaskId> {
        self.correlation.get(job_uid).map(|id| *id)
    }

    /// Persist `job` and queue its task, now or at `schedule_at`.
    ///
    /// Option problems are rejected before anything is queued. If the queue
    /// refuses the task the job is marked failed.
    pub async fn submit_backup(
        &self,
        job: &mut BackupJob,
        engine: DatabaseEngine,
        enqueue: EnqueueOptions,
        schedule_at: Option<DateTime<Utc>>,
    ) -> Result<TaskInfo> {
        if job.status != BackupStatus::Pending {
            return Err(VaultError::invalid_state_transition(job.status, BackupStatus::Pending)
                .with_context("job_uid", &job.uid));
        }

        let mut options = job.options.clone();
        if options.compression.is_none() {
            options.compression = self.default_compression;
        }
        let mut effective = options.clone();
        job.backup_type.apply(&mut effective)?;
        args::validate_backup_options(engine, &effective)?;

        let payload = BackupPayload {
            backup_job_id: job.id,
            connection_id: job.connection_id,
            engine,
            backup_type: job.backup_type,
            options,
        };

        let now = Utc::now();
        let run_at = schedule_at.filter(|at| *at > now);
        job.is_scheduled = run_at.is_some();
        job.scheduled_at = run_at;
        job.updated_at = now;
        self.store.save_job(job).await?;

        let submitted = match run_at {
            Some(at) => self.queue.enqueue_at(BACKUP_TASK, &payload, at, enqueue).await,
            None => self.queue.enqueue_now(BACKUP_TASK, &payload, enqueue).await,
        };
        let task = match submitted {
            Ok(task) => task,
            Err(error) => {
                job.fail(error.user_message(), error.error_code(), Utc::now())?;
                self.store.save_job(job).await?;
                return Err(error);
            }
        };

        self.correlation.insert(job.uid.clone(), task.id);
        tracing::info!(
            job_uid = %job.uid,
            task_id = %task.id,
            queue = %task.queue,
            scheduled = job.is_scheduled,
            "Backup submitted"
        );
        Ok(task)
    }

    /// Cancel a pending or running job. Tasks still waiting in the queue are
    /// removed; a running subprocess is left to finish and its result discarded.
    pub async fn cancel_backup(&self, job_uid: &str) -> Result<BackupJob> {
        let mut job = self.store.load_job_by_uid(job_uid).await?;
        job.cancel(Utc::now())?;
        self.store.save_job(&job).await?;

        match self.find_waiting_task(&job).await? {
            Some(task_id) => match self.queue.cancel(&task_id).await {
                Ok(()) => tracing::info!(job_uid, task_id = %task_id, "Queued backup task removed"),
                Err(e) => tracing::debug!(job_uid, task_id = %task_id, error = %e, "Backup task no longer cancellable"),
            },
            None => tracing::debug!(job_uid, "No waiting task found for cancelled job"),
        }
        self.correlation.remove(job_uid);
        Ok(job)
    }

    async fn find_waiting_task(&self, job: &BackupJob) -> Result<Option<TaskId>> {
        if let Some(id) = self.task_for(&job.uid) {
            return Ok(Some(id));
        }
        let wanted = serde_json::Value::String(job.id.to_string());
        for state in [TaskState::Pending, TaskState::Scheduled, TaskState::Retry] {
            let tasks = self.queue.list(Some(BACKUP_TASK), state).await?;
            if let Some(task) = tasks
                .into_iter()
                .find(|t| t.payload.get("backup_job_id") == Some(&wanted))
            {
                return Ok(Some(task.id));
            }
        }
        Ok(None)
    }

    /// Reset a failed or cancelled job and queue it again.
    pub async fn retry_backup(&self, job_uid: &str, enqueue: EnqueueOptions) -> Result<TaskInfo> {
        let mut job = self.store.load_job_by_uid(job_uid).await?;
        job.retry(Utc::now())?;
        let connection = self.store.load_connection(job.connection_id).await?;
        self.submit_backup(&mut job, connection.engine, enqueue, None).await
    }

    /// Current status and progress, straight from the store.
    pub async fn query_progress(&self, job_uid: &str) -> Result<ProgressReport> {
        Ok(self.store.load_job_by_uid(job_uid).await?.progress_report())
    }

    /// Queue a restore of a completed job's latest artifact.
    pub async fn submit_restore(
        &self,
        job_uid: &str,
        target: RestoreTarget,
        options: RestoreOptions,
        enqueue: EnqueueOptions,
    ) -> Result<TaskInfo> {
        let mut job = self.store.load_job_by_uid(job_uid).await?;
        if job.status != BackupStatus::Completed {
            return Err(VaultError::validation(format!(
                "job {} is {}; only completed backups can be restored",
                job.uid, job.status
            )));
        }
        let now = Utc::now();
        let file = job
            .files
            .last_mut()
            .ok_or_else(|| VaultError::not_found("backup file", job_uid.to_string()))?;
        if file.is_expired(now) {
            return Err(VaultError::validation(format!(
                "artifact for job {} expired at {}",
                job_uid,
                file.expires_at.map(|t| t.to_rfc3339()).unwrap_or_default()
            )));
        }
        file.record_download(now);
        let artifact = PathBuf::from(&file.path);

        let payload = RestorePayload {
            backup_job_id: job.id,
            connection_id: target.connection_id.unwrap_or(job.connection_id),
            target_database: target.database,
            artifact,
            options,
        };
        // Target must exist before anything is queued
        self.store.load_connection(payload.connection_id).await?;

        let task = self.queue.enqueue_now(RESTORE_TASK, &payload, enqueue).await?;
        self.store.save_job(&job).await?;
        tracing::info!(job_uid, task_id = %task.id, "Restore submitted");
        Ok(task)
    }

    /// Drop expired artifact records and delete their local files.
    pub async fn purge_expired_artifacts(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.store.take_expired_files(now).await?;
        for file in &expired {
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %file.path, error = %e, "Failed to delete expired artifact"),
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Purged expired artifacts");
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::model::{BackupType, DatabaseConnection};
    use crate::backup::store::InMemoryBackupStore;
    use crate::error::ErrorCode;
    use crate::executor::BackupOptions;

    async fn service() -> (BackupService, Arc<JobQueue>, DatabaseConnection) {
        let queue = Arc::new(JobQueue::in_memory());
        let store = Arc::new(InMemoryBackupStore::new());
        let conn = DatabaseConnection::new("main", DatabaseEngine::Postgres, "localhost", "postgres", "app");
        store.save_connection(&conn).await.unwrap();
        (BackupService::new(queue.clone(), store), queue, conn)
    }

    fn new_job(conn: &DatabaseConnection) -> BackupJob {
        BackupJob::create(conn.id, BackupType::Full, BackupOptions::default(), None, Utc::now())
    }

    #[tokio::test]
    async fn test_submit_and_cancel_pending() {
        let (svc, queue, conn) = service().await;
        let mut job = new_job(&conn);
        let task = svc
            .submit_backup(&mut job, DatabaseEngine::Postgres, EnqueueOptions::new(), None)
            .await
            .unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(svc.task_for(&job.uid), Some(task.id));

        let cancelled = svc.cancel_backup(&job.uid).await.unwrap();
        assert_eq!(cancelled.status, BackupStatus::Cancelled);
        assert!(queue.get_by_id(&task.id).await.is_err());
    }

    #[tokio::test]
    async fn test_configured_default_compression_fills_unset_option() {
        let queue = Arc::new(JobQueue::in_memory());
        let store = Arc::new(InMemoryBackupStore::new());
        let config = ExecutorConfig {
            default_compression: Some("zstd".into()),
            ..ExecutorConfig::default()
        };
        let svc = BackupService::from_config(queue, store, &config).unwrap();
        let conn = DatabaseConnection::new("main", DatabaseEngine::Postgres, "localhost", "postgres", "app");

        let mut job = new_job(&conn);
        let task = svc
            .submit_backup(&mut job, DatabaseEngine::Postgres, EnqueueOptions::new(), None)
            .await
            .unwrap();
        let payload: BackupPayload = task.payload_as().unwrap();
        assert_eq!(payload.options.compression, Some(CompressionAlgorithm::Zstd));

        // An explicit choice wins over the default
        let mut gz = BackupJob::create(
            conn.id,
            BackupType::Full,
            BackupOptions {
                compression: Some(CompressionAlgorithm::Gzip),
                ..Default::default()
            },
            None,
            Utc::now(),
        );
        let task = svc
            .submit_backup(&mut gz, DatabaseEngine::Postgres, EnqueueOptions::new(), None)
            .await
            .unwrap();
        let payload: BackupPayload = task.payload_as().unwrap();
        assert_eq!(payload.options.compression, Some(CompressionAlgorithm::Gzip));
    }

    #[test]
    fn test_unknown_default_compression_rejected() {
        let config = ExecutorConfig {
            default_compression: Some("rar".into()),
            ..ExecutorConfig::default()
        };
        let result = BackupService::from_config(
            Arc::new(JobQueue::in_memory()),
            Arc::new(InMemoryBackupStore::new()),
            &config,
        );
        assert_eq!(result.err().map(|e| e.code()), Some(ErrorCode::UnsupportedAlgorithm));
    }

    #[tokio::test]
    async fn test_scheduled_submission() {
        let (svc, queue, conn) = service().await;
        let mut job = new_job(&conn);
        let at = Utc::now() + chrono::Duration::hours(1);
        let task = svc
            .submit_backup(&mut job, DatabaseEngine::Postgres, EnqueueOptions::new(), Some(at))
            .await
            .unwrap();
        assert!(job.is_scheduled);
        assert_eq!(task.state, TaskState::Scheduled);
        assert!(queue.dequeue("default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conflicting_type_rejected_before_queueing() {
        let (svc, queue, conn) = service().await;
        let mut job = BackupJob::create(
            conn.id,
            BackupType::SchemaOnly,
            BackupOptions {
                data_only: true,
                ..Default::default()
            },
            None,
            Utc::now(),
        );
        let err = svc
            .submit_backup(&mut job, DatabaseEngine::Postgres, EnqueueOptions::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidOptions);
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending + stats.scheduled, 0);
    }

    #[tokio::test]
    async fn test_cancel_failed_job_is_rejected() {
        let (svc, _queue, conn) = service().await;
        let mut job = new_job(&conn);
        job.start(Utc::now()).unwrap();
        job.fail("x", "TOOL_FAILED", Utc::now()).unwrap();
        svc.store().save_job(&job).await.unwrap();

        let err = svc.cancel_backup(&job.uid).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
        let stored = svc.store().load_job(job.id).await.unwrap();
        assert_eq!(stored.status, BackupStatus::Failed);
    }

    #[tokio::test]
    async fn test_retry_resubmits() {
        let (svc, _queue, conn) = service().await;
        let mut job = new_job(&conn);
        job.start(Utc::now()).unwrap();
        job.update_progress(50.0, "half", Utc::now());
        job.fail("x", "TOOL_FAILED", Utc::now()).unwrap();
        svc.store().save_job(&job).await.unwrap();

        let task = svc.retry_backup(&job.uid, EnqueueOptions::new()).await.unwrap();
        let report = svc.query_progress(&job.uid).await.unwrap();
        assert_eq!(report.status, BackupStatus::Pending);
        assert_eq!(report.progress, 0.0);
        assert!(report.error_message.is_none());
        assert!(report.error_code.is_none());
        assert_eq!(svc.task_for(&job.uid), Some(task.id));
    }

    #[tokio::test]
    async fn test_restore_requires_completed_job() {
        let (svc, _queue, conn) = service().await;
        let mut job = new_job(&conn);
        svc.submit_backup(&mut job, DatabaseEngine::Postgres, EnqueueOptions::new(), None)
            .await
            .unwrap();
        let err = svc
            .submit_restore(&job.uid, RestoreTarget::default(), RestoreOptions::default(), EnqueueOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }
}
