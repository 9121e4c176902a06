//! Persistence boundary for backup records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::model::{BackupFile, BackupJob, DatabaseConnection};
use crate::error::{Result, VaultError};

/// Loads and saves backup jobs and connections.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn load_job(&self, id: Uuid) -> Result<BackupJob>;

    async fn load_job_by_uid(&self, uid: &str) -> Result<BackupJob>;

    /// Insert or replace a job together with its files.
    async fn save_job(&self, job: &BackupJob) -> Result<()>;

    /// Apply a progress report to a running job without touching anything
    /// else. Returns `false` when the job is no longer running.
    async fn update_progress(&self, id: Uuid, percent: f64, step: &str) -> Result<bool>;

    async fn load_connection(&self, id: Uuid) -> Result<DatabaseConnection>;

    async fn save_connection(&self, connection: &DatabaseConnection) -> Result<()>;

    /// Remove file records past their expiry and return them.
    async fn take_expired_files(&self, now: DateTime<Utc>) -> Result<Vec<BackupFile>>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// `DashMap`-backed store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryBackupStore {
    jobs: DashMap<Uuid, BackupJob>,
    connections: DashMap<Uuid, DatabaseConnection>,
}

impl InMemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackupStore for InMemoryBackupStore {
    async fn load_job(&self, id: Uuid) -> Result<BackupJob> {
        self.jobs
            .get(&id)
            .map(|j| j.clone())
            .ok_or_else(|| VaultError::job_not_found(id))
    }

    async fn load_job_by_uid(&self, uid: &str) -> Result<BackupJob> {
        self.jobs
            .iter()
            .find(|j| j.uid == uid)
            .map(|j| j.clone())
            .ok_or_else(|| VaultError::job_not_found(uid))
    }

    async fn save_job(&self, job: &BackupJob) -> Result<()> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, percent: f64, step: &str) -> Result<bool> {
        let mut job = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| VaultError::job_not_found(id))?;
        Ok(job.update_progress(percent, step, Utc::now()))
    }

    async fn load_connection(&self, id: Uuid) -> Result<DatabaseConnection> {
        self.connections
            .get(&id)
            .map(|c| c.clone())
            .ok_or_else(|| VaultError::connection_not_found(id))
    }

    async fn save_connection(&self, connection: &DatabaseConnection) -> Result<()> {
        self.connections.insert(connection.id, connection.clone());
        Ok(())
    }

    async fn take_expired_files(&self, now: DateTime<Utc>) -> Result<Vec<BackupFile>> {
        let mut expired = Vec::new();
        for mut job in self.jobs.iter_mut() {
            let (gone, kept): (Vec<_>, Vec<_>) =
                job.files.drain(..).partition(|f| f.is_expired(now));
            job.files = kept;
            expired.extend(gone);
        }
        Ok(expired)
    }
}
