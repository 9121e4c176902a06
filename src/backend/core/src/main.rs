//! DbVault worker - hosts the job queue consumers that run backups and restores.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use dbvault_core::{
    backup::{BackupService, BackupStore, BackupTaskHandler, InMemoryBackupStore, RestoreTaskHandler, BACKUP_TASK, RESTORE_TASK},
    config::Config,
    db::Database,
    executor::ProcessExecutor,
    health::{HealthConfig, HealthService, QueueHealthChecker, StartMarker, StoreHealthChecker, ToolsHealthChecker},
    jobs::{Forwarder, JobQueue, JobWorker, QueueDefaults, WorkerConfig},
    telemetry::{init_telemetry, TelemetryConfig},
};

/// How often expired artifacts are purged from disk and the store.
const PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Parser)]
#[command(name = "dbvault-worker", version, about = "Runs queued database backup and restore jobs")]
struct Args {
    /// Configuration file (environment variables still override it)
    #[arg(short, long, env = "DBVAULT_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let started = StartMarker::now();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(&path.to_string_lossy())?,
        None => Config::load()?,
    };

    let telemetry = init_telemetry(&TelemetryConfig::from_config(&config, "dbvault-worker"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "Starting DbVault worker"
    );

    let defaults = QueueDefaults {
        timeout: config.worker.default_task_timeout,
        ..QueueDefaults::default()
    };
    let queue = Arc::new(
        JobQueue::connect_redis(&config.redis.url, &config.redis.key_prefix, defaults).await?,
    );
    queue.health_check().await?;
    tracing::info!(prefix = %config.redis.key_prefix, "Connected to broker");

    let store: Arc<dyn BackupStore> = match &config.database {
        Some(db_config) => {
            let db = Database::new(db_config).await?;
            db.migrate().await?;
            tracing::info!("Connected to database, migrations applied");
            Arc::new(db)
        }
        None => {
            tracing::warn!("No database configured, backup records are kept in memory only");
            Arc::new(InMemoryBackupStore::new())
        }
    };

    let executor = Arc::new(ProcessExecutor::from_config(&config.executor));
    if let Err(e) = executor.validate_tools_available() {
        tracing::warn!(error = %e, "Some tools are missing; jobs that need them will fail");
    }

    let mut health = HealthService::new(HealthConfig::default(), started);
    health.register_checker(Arc::new(QueueHealthChecker::new(queue.clone())));
    health.register_checker(Arc::new(StoreHealthChecker::new(store.clone())));
    health.register_checker(Arc::new(ToolsHealthChecker::new(executor.tools().clone())));
    let report = health.check_health().await;
    tracing::info!(status = %report.status, healthy = report.summary.healthy, total = report.summary.total, "Startup health check");

    let backup_handler = BackupTaskHandler::new(store.clone(), executor.clone())
        .with_artifact_retention(config.executor.artifact_retention);
    let restore_handler = RestoreTaskHandler::new(store.clone(), executor.clone());

    let worker = JobWorker::new(queue.clone(), WorkerConfig::from_settings(&config.worker)?)
        .handle(BACKUP_TASK, Arc::new(backup_handler))
        .handle(RESTORE_TASK, Arc::new(restore_handler))
        .start();

    let shutdown = CancellationToken::new();
    let forwarder = Forwarder::new(queue.clone(), config.worker.forward_interval).start(shutdown.clone());

    let service = BackupService::from_config(queue.clone(), store.clone(), &config.executor)?;
    let purge_shutdown = shutdown.clone();
    let purger = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = purge_shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = service.purge_expired_artifacts(Utc::now()).await {
                        tracing::warn!(error = %e, "Artifact purge failed");
                    }
                }
            }
        }
    });

    shutdown_signal().await?;

    shutdown.cancel();
    worker.stop().await;
    let _ = tokio::join!(forwarder, purger);

    telemetry.shutdown();
    tracing::info!("Worker shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => result?,
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await?;

    tracing::info!("Shutdown signal received");
    Ok(())
}
