//! Backup jobs: domain model, persistence boundary, worker handlers and the
//! request-side service.

pub mod handler;
pub mod model;
pub mod service;
pub mod store;

pub use handler::{BackupPayload, BackupTaskHandler, RestorePayload, RestoreTaskHandler, BACKUP_TASK, RESTORE_TASK};
pub use model::{
    BackupFile, BackupJob, BackupStatus, BackupType, DatabaseConnection, DatabaseEngine,
    ProgressReport,
};
pub use service::{BackupService, RestoreTarget};
pub use store::{BackupStore, InMemoryBackupStore};
