//! Backup domain records and the job state machine.
//!
//! ```text
//!   create ──▶ pending ──start──▶ running ──complete──▶ completed
//!                │  ▲               │
//!                │  │               ├──fail──▶ failed ────┐
//!                │  └───retry───────┼─────────────────────┤
//!                └──────cancel──────┴──▶ cancelled ───────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::executor::{BackupOptions, BackupResult, ConnectionParams};

// ═══════════════════════════════════════════════════════════════════════════════
// Enumerations
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    #[serde(alias = "postgresql")]
    Postgres,
    #[serde(alias = "mariadb")]
    Mysql,
}

impl DatabaseEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseEngine::Postgres => "postgres",
            DatabaseEngine::Mysql => "mysql",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseEngine::Postgres => 5432,
            DatabaseEngine::Mysql => 3306,
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseEngine {
    type Err = VaultError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            _ => Err(VaultError::unsupported_engine(s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    #[default]
    Full,
    Incremental,
    SchemaOnly,
    DataOnly,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
            BackupType::SchemaOnly => "schema_only",
            BackupType::DataOnly => "data_only",
        }
    }

    /// Fold the type into executor options.
    pub fn apply(&self, options: &mut BackupOptions) -> Result<()> {
        match self {
            BackupType::Full => {}
            BackupType::SchemaOnly => options.schema_only = true,
            BackupType::DataOnly => options.data_only = true,
            BackupType::Incremental => {
                return Err(VaultError::invalid_options(
                    "incremental backups are not supported by pg_dump or mysqldump",
                ))
            }
        }
        Ok(())
    }
}

impl FromStr for BackupType {
    type Err = VaultError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            "schema_only" => Ok(Self::SchemaOnly),
            "data_only" => Ok(Self::DataOnly),
            other => Err(VaultError::validation(format!("unknown backup type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Running => "running",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
            BackupStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, BackupStatus::Pending | BackupStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(VaultError::validation(format!("unknown backup status: {}", other))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Connection
// ═══════════════════════════════════════════════════════════════════════════════

/// A registered database. Credentials are held as given; encryption at rest
/// belongs to the persistence layer.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConnection {
    pub id: Uuid,
    pub name: String,
    pub engine: DatabaseEngine,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub database: String,
}

impl DatabaseConnection {
    pub fn new(
        name: impl Into<String>,
        engine: DatabaseEngine,
        host: impl Into<String>,
        username: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            engine,
            host: host.into(),
            port: engine.default_port(),
            username: username.into(),
            password: None,
            database: database.into(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Target a different database on the same server.
    pub fn params_for(&self, database: impl Into<String>) -> ConnectionParams {
        ConnectionParams {
            database: database.into(),
            ..self.params()
        }
    }

    pub fn params(&self) -> ConnectionParams {
        ConnectionParams {
            engine: self.engine,
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
        }
    }
}

impl fmt::Debug for DatabaseConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConnection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Artifact
// ═══════════════════════════════════════════════════════════════════════════════

/// Metadata for one artifact produced by a job. Only download bookkeeping
/// changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupFile {
    pub id: Uuid,
    pub backup_job_id: Uuid,
    /// Local path or storage key
    pub path: String,
    pub original_size: u64,
    pub compressed_size: Option<u64>,
    pub checksum: String,
    pub compression: Option<String>,
    pub encrypted: bool,
    pub download_count: u32,
    pub last_downloaded_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BackupFile {
    pub fn from_result(
        backup_job_id: Uuid,
        result: &BackupResult,
        retention: Option<std::time::Duration>,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = retention
            .and_then(|r| chrono::Duration::from_std(r).ok())
            .map(|r| now + r);
        Self {
            id: Uuid::new_v4(),
            backup_job_id,
            path: result.path.display().to_string(),
            original_size: result.original_size,
            compressed_size: result.compressed_size,
            checksum: result.checksum.clone(),
            compression: result.compression.map(|c| c.as_str().to_string()),
            encrypted: false,
            download_count: 0,
            last_downloaded_at: None,
            expires_at,
            created_at: now,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compression.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn record_download(&mut self, now: DateTime<Utc>) {
        self.download_count += 1;
        self.last_downloaded_at = Some(now);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backup Job
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: Uuid,
    /// Public opaque identifier
    pub uid: String,
    pub connection_id: Uuid,
    pub backup_type: BackupType,
    pub status: BackupStatus,
    pub progress: f64,
    pub current_step: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub original_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub is_scheduled: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub options: BackupOptions,
    pub files: Vec<BackupFile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackupJob {
    /// New job in `pending`. A `schedule_at` in the future marks it scheduled.
    pub fn create(
        connection_id: Uuid,
        backup_type: BackupType,
        options: BackupOptions,
        schedule_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let scheduled_at = schedule_at.filter(|at| *at > now);
        Self {
            id: Uuid::new_v4(),
            uid: format!("bkp_{}", Uuid::new_v4().simple()),
            connection_id,
            backup_type,
            status: BackupStatus::Pending,
            progress: 0.0,
            current_step: None,
            started_at: None,
            completed_at: None,
            original_size: None,
            compressed_size: None,
            error_message: None,
            error_code: None,
            is_scheduled: scheduled_at.is_some(),
            scheduled_at,
            options,
            files: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, allowed: &[BackupStatus], to: BackupStatus, now: DateTime<Utc>) -> Result<()> {
        if !allowed.contains(&self.status) {
            return Err(VaultError::invalid_state_transition(self.status, to)
                .with_context("job_uid", &self.uid));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// `pending → running`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(&[BackupStatus::Pending], BackupStatus::Running, now)?;
        self.started_at = Some(now);
        self.current_step = Some("Starting".to_string());
        Ok(())
    }

    /// `running → completed`, recording sizes and the artifact.
    pub fn complete(&mut self, result: &BackupResult, file: Option<BackupFile>, now: DateTime<Utc>) -> Result<()> {
        self.transition(&[BackupStatus::Running], BackupStatus::Completed, now)?;
        self.completed_at = Some(now);
        self.progress = 100.0;
        self.current_step = Some("Completed".to_string());
        self.original_size = Some(result.original_size);
        self.compressed_size = result.compressed_size;
        self.files.extend(file);
        Ok(())
    }

    /// `pending|running → failed`. Sizes stay unset.
    pub fn fail(&mut self, message: impl Into<String>, code: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(
            &[BackupStatus::Pending, BackupStatus::Running],
            BackupStatus::Failed,
            now,
        )?;
        self.completed_at = Some(now);
        self.error_message = Some(message.into());
        self.error_code = Some(code.into());
        Ok(())
    }

    /// `pending|running → cancelled`.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(
            &[BackupStatus::Pending, BackupStatus::Running],
            BackupStatus::Cancelled,
            now,
        )?;
        self.completed_at = Some(now);
        self.current_step = Some("Cancelled".to_string());
        Ok(())
    }

    /// `failed|cancelled → pending`, clearing every per-run field.
    pub fn retry(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(
            &[BackupStatus::Failed, BackupStatus::Cancelled],
            BackupStatus::Pending,
            now,
        )?;
        self.progress = 0.0;
        self.current_step = None;
        self.error_message = None;
        self.error_code = None;
        self.started_at = None;
        self.completed_at = None;
        Ok(())
    }

    /// Apply a progress report. Ignored unless running; the percentage never
    /// moves backwards, the step is last-write-wins.
    pub fn update_progress(&mut self, percent: f64, step: &str, now: DateTime<Utc>) -> bool {
        if self.status != BackupStatus::Running || percent.is_nan() {
            return false;
        }
        self.progress = self.progress.max(percent.clamp(0.0, 100.0));
        self.current_step = Some(step.to_string());
        self.updated_at = now;
        true
    }

    /// Derived, never stored.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn progress_report(&self) -> ProgressReport {
        ProgressReport {
            job_uid: self.uid.clone(),
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_seconds: self.duration().map(|d| d.num_seconds()),
            original_size: self.original_size,
            compressed_size: self.compressed_size,
            error_message: self.error_message.clone(),
            error_code: self.error_code.clone(),
        }
    }
}

/// Read-only view returned by progress queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub job_uid: String,
    pub status: BackupStatus,
    pub progress: f64,
    pub current_step: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Whole seconds
    pub duration_seconds: Option<i64>,
    pub original_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
}
