//! Database layer for DbVault.
//!
//! Uses PostgreSQL for persistent storage with sqlx.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::backup::model::{BackupFile, BackupJob, DatabaseConnection};
use crate::backup::store::BackupStore;
use crate::config::DatabaseConfig;
use crate::error::{Result, VaultError};

/// Database connection and operations.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| VaultError::from(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn files_for(&self, job_id: Uuid) -> Result<Vec<BackupFile>> {
        let rows = sqlx::query_as::<_, BackupFileRow>(
            r#"
            SELECT id, backup_job_id, path, original_size, compressed_size, checksum,
                   compression, encrypted, download_count, last_downloaded_at,
                   expires_at, created_at
            FROM backup_files
            WHERE backup_job_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BackupFile::from).collect())
    }

    async fn job_from_row(&self, row: BackupJobRow) -> Result<BackupJob> {
        let files = self.files_for(row.id).await?;
        let mut job = row.into_job()?;
        job.files = files;
        Ok(job)
    }
}

const JOB_COLUMNS: &str = r#"
    id, uid, connection_id, backup_type, status, progress, current_step,
    started_at, completed_at, original_size, compressed_size, error_message,
    error_code, is_scheduled, scheduled_at, options, created_at, updated_at
"#;

#[async_trait]
impl BackupStore for Database {
    async fn load_job(&self, id: Uuid) -> Result<BackupJob> {
        let row = sqlx::query_as::<_, BackupJobRow>(&format!(
            "SELECT {} FROM backup_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| VaultError::job_not_found(id))?;

        self.job_from_row(row).await
    }

    async fn load_job_by_uid(&self, uid: &str) -> Result<BackupJob> {
        let row = sqlx::query_as::<_, BackupJobRow>(&format!(
            "SELECT {} FROM backup_jobs WHERE uid = $1",
            JOB_COLUMNS
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| VaultError::job_not_found(uid))?;

        self.job_from_row(row).await
    }

    async fn save_job(&self, job: &BackupJob) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO backup_jobs (
                id, uid, connection_id, backup_type, status, progress, current_step,
                started_at, completed_at, original_size, compressed_size, error_message,
                error_code, is_scheduled, scheduled_at, options, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                progress = EXCLUDED.progress,
                current_step = EXCLUDED.current_step,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                original_size = EXCLUDED.original_size,
                compressed_size = EXCLUDED.compressed_size,
                error_message = EXCLUDED.error_message,
                error_code = EXCLUDED.error_code,
                is_scheduled = EXCLUDED.is_scheduled,
                scheduled_at = EXCLUDED.scheduled_at,
                options = EXCLUDED.options,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(job.id)
        .bind(&job.uid)
        .bind(job.connection_id)
        .bind(job.backup_type.as_str())
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(&job.current_step)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.original_size.map(|s| s as i64))
        .bind(job.compressed_size.map(|s| s as i64))
        .bind(&job.error_message)
        .bind(&job.error_code)
        .bind(job.is_scheduled)
        .bind(job.scheduled_at)
        .bind(serde_json::to_value(&job.options)?)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        for file in &job.files {
            sqlx::query(
                r#"
                INSERT INTO backup_files (
                    id, backup_job_id, path, original_size, compressed_size, checksum,
                    compression, encrypted, download_count, last_downloaded_at,
                    expires_at, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (id) DO UPDATE SET
                    download_count = EXCLUDED.download_count,
                    last_downloaded_at = EXCLUDED.last_downloaded_at
                "#,
            )
            .bind(file.id)
            .bind(file.backup_job_id)
            .bind(&file.path)
            .bind(file.original_size as i64)
            .bind(file.compressed_size.map(|s| s as i64))
            .bind(&file.checksum)
            .bind(&file.compression)
            .bind(file.encrypted)
            .bind(file.download_count as i32)
            .bind(file.last_downloaded_at)
            .bind(file.expires_at)
            .bind(file.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, percent: f64, step: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE backup_jobs
            SET progress = GREATEST(progress, LEAST(GREATEST($2, 0), 100)),
                current_step = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(percent)
        .bind(step)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn load_connection(&self, id: Uuid) -> Result<DatabaseConnection> {
        let row = sqlx::query_as::<_, ConnectionRow>(
            r#"
            SELECT id, name, engine, host, port, username, password, database_name
            FROM database_connections
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| VaultError::connection_not_found(id))?;

        row.try_into()
    }

    async fn save_connection(&self, connection: &DatabaseConnection) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO database_connections (id, name, engine, host, port, username, password, database_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                engine = EXCLUDED.engine,
                host = EXCLUDED.host,
                port = EXCLUDED.port,
                username = EXCLUDED.username,
                password = EXCLUDED.password,
                database_name = EXCLUDED.database_name
            "#,
        )
        .bind(connection.id)
        .bind(&connection.name)
        .bind(connection.engine.as_str())
        .bind(&connection.host)
        .bind(connection.port as i32)
        .bind(&connection.username)
        .bind(&connection.password)
        .bind(&connection.database)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn take_expired_files(&self, now: DateTime<Utc>) -> Result<Vec<BackupFile>> {
        let rows = sqlx::query_as::<_, BackupFileRow>(
            r#"
            DELETE FROM backup_files
            WHERE expires_at IS NOT NULL AND expires_at <= $1
            RETURNING id, backup_job_id, path, original_size, compressed_size, checksum,
                      compression, encrypted, download_count, last_downloaded_at,
                      expires_at, created_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BackupFile::from).collect())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
pub struct BackupJobRow {
    pub id: Uuid,
    pub uid: String,
    pub connection_id: Uuid,
    pub backup_type: String,
    pub status: String,
    pub progress: f64,
    pub current_step: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub original_size: Option<i64>,
    pub compressed_size: Option<i64>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub is_scheduled: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub options: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackupJobRow {
    fn into_job(self) -> Result<BackupJob> {
        Ok(BackupJob {
            id: self.id,
            uid: self.uid,
            connection_id: self.connection_id,
            backup_type: self.backup_type.parse()?,
            status: self.status.parse()?,
            progress: self.progress,
            current_step: self.current_step,
            started_at: self.started_at,
            completed_at: self.completed_at,
            original_size: self.original_size.map(|s| s as u64),
            compressed_size: self.compressed_size.map(|s| s as u64),
            error_message: self.error_message,
            error_code: self.error_code,
            is_scheduled: self.is_scheduled,
            scheduled_at: self.scheduled_at,
            options: serde_json::from_value(self.options)?,
            files: Vec::new(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct BackupFileRow {
    pub id: Uuid,
    pub backup_job_id: Uuid,
    pub path: String,
    pub original_size: i64,
    pub compressed_size: Option<i64>,
    pub checksum: String,
    pub compression: Option<String>,
    pub encrypted: bool,
    pub download_count: i32,
    pub last_downloaded_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<BackupFileRow> for BackupFile {
    fn from(row: BackupFileRow) -> Self {
        Self {
            id: row.id,
            backup_job_id: row.backup_job_id,
            path: row.path,
            original_size: row.original_size as u64,
            compressed_size: row.compressed_size.map(|s| s as u64),
            checksum: row.checksum,
            compression: row.compression,
            encrypted: row.encrypted,
            download_count: row.download_count.max(0) as u32,
            last_downloaded_at: row.last_downloaded_at,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ConnectionRow {
    pub id: Uuid,
    pub name: String,
    pub engine: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    pub password: Option<String>,
    pub database_name: String,
}

impl TryFrom<ConnectionRow> for DatabaseConnection {
    type Error = VaultError;

    fn try_from(row: ConnectionRow) -> Result<Self> {
        let port = u16::try_from(row.port)
            .map_err(|_| VaultError::validation(format!("invalid port {} for connection {}", row.port, row.id)))?;
        Ok(Self {
            id: row.id,
            name: row.name,
            engine: row.engine.parse()?,
            host: row.host,
            port,
            username: row.username,
            password: row.password,
            database: row.database_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::model::{BackupStatus, BackupType, DatabaseEngine};

    fn job_row() -> BackupJobRow {
        let now = Utc::now();
        BackupJobRow {
            id: Uuid::new_v4(),
            uid: "bkp_1".into(),
            connection_id: Uuid::new_v4(),
            backup_type: "schema_only".into(),
            status: "failed".into(),
            progress: 12.5,
            current_step: None,
            started_at: Some(now),
            completed_at: Some(now),
            original_size: None,
            compressed_size: None,
            error_message: Some("boom".into()),
            error_code: Some("TOOL_FAILED".into()),
            is_scheduled: false,
            scheduled_at: None,
            options: serde_json::json!({"compression": "zstd"}),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_job_row_conversion() {
        let job = job_row().into_job().unwrap();
        assert_eq!(job.backup_type, BackupType::SchemaOnly);
        assert_eq!(job.status, BackupStatus::Failed);
        assert_eq!(
            job.options.compression,
            Some(crate::executor::CompressionAlgorithm::Zstd)
        );
    }

    #[test]
    fn test_job_row_with_unknown_status() {
        let mut row = job_row();
        row.status = "paused".into();
        assert!(row.into_job().is_err());
    }

    #[test]
    fn test_connection_row_conversion() {
        let row = ConnectionRow {
            id: Uuid::new_v4(),
            name: "main".into(),
            engine: "postgresql".into(),
            host: "db".into(),
            port: 70_000,
            username: "u".into(),
            password: None,
            database_name: "app".into(),
        };
        assert!(DatabaseConnection::try_from(row).is_err());

        let row = ConnectionRow {
            id: Uuid::new_v4(),
            name: "main".into(),
            engine: "postgresql".into(),
            host: "db".into(),
            port: 5433,
            username: "u".into(),
            password: None,
            database_name: "app".into(),
        };
        let conn = DatabaseConnection::try_from(row).unwrap();
        assert_eq!(conn.engine, DatabaseEngine::Postgres);
        assert_eq!(conn.port, 5433);
    }
}
