//! Process Executor.
//!
//! Runs native dump/restore binaries as supervised subprocesses:
//!
//! - **Tools**: binaries located once at startup ([`ToolRegistry`])
//! - **Args**: deterministic argv per engine ([`args`])
//! - **Progress**: stderr scanned line by line into estimates ([`ProgressEstimator`])
//! - **Compression**: optional post-step of backup, pre-step of restore ([`Compressor`])
//!
//! The executor never retries. Every failure removes partial output and
//! returns an error naming the tool. Children are spawned with
//! `kill_on_drop`, so dropping a backup future (timeout, shutdown) kills the
//! subprocess.

pub mod args;
pub mod compression;
pub mod progress;
pub mod tools;

pub use args::ToolInvocation;
pub use compression::{CompressionAlgorithm, Compressor};
pub use progress::{
    MysqlDumpProgress, PgDumpProgress, PgRestoreProgress, ProgressCallback, ProgressEstimator,
    ProgressUpdate,
};
pub use tools::{Tool, ToolRegistry};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::backup::model::DatabaseEngine;
use crate::config::ExecutorConfig;
use crate::error::{Result, VaultError};
use crate::telemetry::{SensitiveFieldRedactor, ToolMetrics};

/// Stderr lines kept for error reporting.
const STDERR_TAIL: usize = 20;

// ═══════════════════════════════════════════════════════════════════════════════
// Options and results
// ═══════════════════════════════════════════════════════════════════════════════

/// Dump output format. MySQL only supports `plain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    #[default]
    Plain,
    Custom,
    Tar,
    Directory,
}

impl DumpFormat {
    pub fn pg_flag(&self) -> &'static str {
        match self {
            DumpFormat::Plain => "p",
            DumpFormat::Custom => "c",
            DumpFormat::Tar => "t",
            DumpFormat::Directory => "d",
        }
    }

    /// Artifact extension; directory dumps have none.
    pub fn extension(&self) -> &'static str {
        match self {
            DumpFormat::Plain => ".sql",
            DumpFormat::Custom => ".dump",
            DumpFormat::Tar => ".tar",
            DumpFormat::Directory => "",
        }
    }
}

/// Everything needed to reach one database.
#[derive(Clone)]
pub struct ConnectionParams {
    pub engine: DatabaseEngine,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub database: String,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("database", &self.database)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupOptions {
    pub include_tables: Vec<String>,
    pub exclude_tables: Vec<String>,
    pub schema_only: bool,
    pub data_only: bool,
    pub format: DumpFormat,
    pub parallel_jobs: Option<u32>,
    pub verbose: bool,
    pub compression: Option<CompressionAlgorithm>,
    /// Artifact file name without extension; defaults to `<database>_<timestamp>`
    pub file_stem: Option<String>,
    #[serde(skip)]
    pub progress: Option<ProgressCallback>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreOptions {
    pub drop_existing: bool,
    pub create_database: bool,
    pub parallel_jobs: Option<u32>,
    /// Keep going past SQL errors
    pub force: bool,
    #[serde(skip)]
    pub progress: Option<ProgressCallback>,
}

/// Outcome of a successful backup.
#[derive(Debug, Clone)]
pub struct BackupResult {
    /// Final artifact (compressed when compression was requested)
    pub path: PathBuf,
    pub original_size: u64,
    pub compressed_size: Option<u64>,
    pub compression: Option<CompressionAlgorithm>,
    pub duration: Duration,
    pub tables: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    /// Hex SHA-256 of the final artifact
    pub checksum: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Partial output cleanup
// ═══════════════════════════════════════════════════════════════════════════════

/// Removes a file or directory on drop unless disarmed.
#[derive(Debug)]
pub struct PartialOutputGuard {
    path: PathBuf,
    armed: bool,
}

impl PartialOutputGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialOutputGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let removed = if self.path.is_dir() {
            std::fs::remove_dir_all(&self.path)
        } else {
            std::fs::remove_file(&self.path)
        };
        match removed {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed partial output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove partial output"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Executor
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ProcessExecutor {
    tools: Arc<ToolRegistry>,
    compressor: Compressor,
    output_dir: PathBuf,
}

impl ProcessExecutor {
    pub fn new(tools: Arc<ToolRegistry>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            compressor: Compressor::new(tools.clone()),
            tools,
            output_dir: output_dir.into(),
        }
    }

    /// Locate tools (honouring configured overrides) and build an executor.
    pub fn from_config(config: &ExecutorConfig) -> Self {
        let tools = Arc::new(ToolRegistry::discover(&config.tool_paths));
        Self::new(tools, config.output_dir.clone())
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn compressor(&self) -> &Compressor {
        &self.compressor
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Fail with every missing executable named.
    pub fn validate_tools_available(&self) -> Result<()> {
        self.tools.validate_tools_available()
    }

    /// Dump one database into the output directory.
    pub async fn backup(&self, conn: &ConnectionParams, options: &BackupOptions) -> Result<BackupResult> {
        let started = Instant::now();
        let tool = args::dump_tool(conn.engine);

        // Nothing touches the disk until the tool and options are known good
        self.tools.path(tool)?;
        if let Some(algorithm) = options.compression {
            self.tools.path(algorithm.tool())?;
        }
        args::validate_backup_options(conn.engine, options)?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let stem = options
            .file_stem
            .as_deref()
            .map(sanitize_stem)
            .unwrap_or_else(|| {
                format!(
                    "{}_{}",
                    sanitize_stem(&conn.database),
                    chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f")
                )
            });
        let raw_path = self
            .output_dir
            .join(format!("{}{}", stem, options.format.extension()));
        let mut raw_guard = PartialOutputGuard::new(&raw_path);

        tracing::info!(
            tool = %tool,
            database = %conn.database,
            output = %raw_path.display(),
            "Starting backup"
        );

        let invocation = args::dump_invocation(conn, options, &raw_path)?;
        let mut estimator = dump_estimator(conn.engine);
        self.run(&invocation, Some(estimator.as_mut()), options.progress.as_ref())
            .await?;

        let original_size = artifact_size(&raw_path).await?;

        let (path, compressed_size) = match options.compression {
            Some(algorithm) => {
                let compressed = algorithm.compressed_path(&raw_path);
                let mut compressed_guard = PartialOutputGuard::new(&compressed);
                self.compressor
                    .compress(&raw_path, &compressed, algorithm)
                    .await?;
                let size = tokio::fs::metadata(&compressed).await?.len();
                tokio::fs::remove_file(&raw_path).await?;
                compressed_guard.disarm();
                (compressed, Some(size))
            }
            None => (raw_path.clone(), None),
        };
        // From here on `path` is the only artifact; guard it instead of the raw dump
        raw_guard.disarm();
        let mut final_guard = PartialOutputGuard::new(&path);

        let checksum = checksum(&path).await?;
        final_guard.disarm();

        if let Some(callback) = &options.progress {
            callback.report(&estimator.finish());
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("engine".to_string(), conn.engine.as_str().to_string());
        metadata.insert("tool".to_string(), tool.binary_name().to_string());
        metadata.insert("database".to_string(), conn.database.clone());
        metadata.insert("format".to_string(), format!("{:?}", options.format).to_lowercase());

        let duration = started.elapsed();
        tracing::info!(
            tool = %tool,
            path = %path.display(),
            original_size,
            compressed_size,
            duration_ms = duration.as_millis() as u64,
            "Backup finished"
        );

        Ok(BackupResult {
            path,
            original_size,
            compressed_size,
            compression: options.compression,
            duration,
            tables: estimator.tables().to_vec(),
            metadata,
            checksum,
        })
    }

    /// Restore `artifact` into the connection's database. Compressed artifacts
    /// are decompressed into a scratch directory first.
    pub async fn restore(
        &self,
        conn: &ConnectionParams,
        artifact: &Path,
        options: &RestoreOptions,
    ) -> Result<()> {
        let started = Instant::now();
        if !tokio::fs::try_exists(artifact).await? {
            return Err(VaultError::not_found("artifact", artifact.display().to_string()));
        }

        let mut scratch_guard = None;
        let restore_path = match CompressionAlgorithm::from_path(artifact) {
            Some(_) => {
                let scratch = self
                    .output_dir
                    .join(format!(".restore-{}", uuid::Uuid::new_v4()));
                tokio::fs::create_dir_all(&scratch).await?;
                scratch_guard = Some(PartialOutputGuard::new(&scratch));
                let name = artifact
                    .file_stem()
                    .ok_or_else(|| VaultError::validation("artifact has no file name"))?;
                let target = scratch.join(name);
                self.compressor.decompress(artifact, &target).await?;
                target
            }
            None => artifact.to_path_buf(),
        };

        let steps = args::restore_invocations(conn, &restore_path, options);
        let needed: Vec<Tool> = steps.iter().map(|s| s.tool).collect();
        self.tools.require(&needed)?;

        tracing::info!(
            database = %conn.database,
            artifact = %artifact.display(),
            steps = steps.len(),
            "Starting restore"
        );

        let mut estimator = PgRestoreProgress::new();
        for step in &steps {
            let step_estimator = (step.tool == Tool::PgRestore)
                .then_some(&mut estimator as &mut dyn ProgressEstimator);
            self.run(step, step_estimator, options.progress.as_ref()).await?;
        }

        if let Some(callback) = &options.progress {
            callback.report(&estimator.finish());
        }
        drop(scratch_guard);

        tracing::info!(
            database = %conn.database,
            duration_ms = started.elapsed().as_millis() as u64,
            "Restore finished"
        );
        Ok(())
    }

    /// Spawn one tool, scan its stderr while waiting for exit.
    async fn run(
        &self,
        invocation: &ToolInvocation,
        mut estimator: Option<&mut dyn ProgressEstimator>,
        progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        let tool = invocation.tool;
        let program = self.tools.path(tool)?;
        let redactor = SensitiveFieldRedactor::global();

        tracing::debug!(
            tool = %tool,
            command = %redactor.redact_command(tool.binary_name(), &invocation.args),
            "Spawning tool"
        );

        let mut command = Command::new(program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match &invocation.stdin {
            Some(path) => command.stdin(Stdio::from(tokio::fs::File::open(path).await?.into_std().await)),
            None => command.stdin(Stdio::null()),
        };

        let mut child = command.spawn().map_err(|e| {
            ToolMetrics::record_run(tool.binary_name(), false);
            if e.kind() == std::io::ErrorKind::NotFound {
                VaultError::tool_not_found(tool.binary_name())
            } else {
                VaultError::tool_execution_failed(tool.binary_name(), e.to_string())
            }
        })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| VaultError::internal("child stderr was not captured"))?;

        let scan = async {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL);
            loop {
                buf.clear();
                if reader.read_until(b'\n', &mut buf).await? == 0 {
                    break;
                }
                // stderr is not guaranteed to be UTF-8
                let line = String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string();
                if let Some(est) = estimator.as_mut() {
                    if let (Some(update), Some(callback)) = (est.observe(&line), progress) {
                        callback.report(&update);
                    }
                }
                tracing::trace!(tool = %tool, line = %redactor.redact_value(&line), "stderr");
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok::<_, std::io::Error>(tail)
        };

        let (tail, status) = tokio::join!(scan, child.wait());
        let status = status
            .map_err(|e| VaultError::tool_execution_failed(tool.binary_name(), e.to_string()))?;
        let tail = tail.map_err(|e| {
            ToolMetrics::record_run(tool.binary_name(), false);
            VaultError::tool_execution_failed(tool.binary_name(), format!("reading stderr: {}", e))
        })?;

        if status.success() {
            ToolMetrics::record_run(tool.binary_name(), true);
            return Ok(());
        }
        if let Some(tolerated) = invocation.tolerate {
            if tail.iter().any(|line| line.contains(tolerated)) {
                tracing::debug!(tool = %tool, tolerated, "Ignoring tolerated tool failure");
                ToolMetrics::record_run(tool.binary_name(), true);
                return Ok(());
            }
        }

        ToolMetrics::record_run(tool.binary_name(), false);
        let reason = match tail.back() {
            Some(line) => format!("{}: {}", status, redactor.redact_value(line.trim())),
            None => status.to_string(),
        };
        Err(VaultError::tool_execution_failed(tool.binary_name(), reason)
            .with_context("stderr_tail", tail.iter().map(|l| redactor.redact_value(l)).collect::<Vec<_>>()))
    }
}

fn dump_estimator(engine: DatabaseEngine) -> Box<dyn ProgressEstimator> {
    match engine {
        DatabaseEngine::Postgres => Box::new(PgDumpProgress::new()),
        DatabaseEngine::Mysql => Box::new(MysqlDumpProgress::new()),
    }
}

fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

/// Size of a file, or the summed size of a directory's files.
async fn artifact_size(path: &Path) -> Result<u64> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_dir() {
        return Ok(meta.len());
    }
    let mut total = 0;
    for entry in sorted_entries(path).await? {
        total += tokio::fs::metadata(&entry).await?.len();
    }
    Ok(total)
}

/// Hex SHA-256 of a file. Directories hash each file's name and content in
/// name order.
pub async fn checksum(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    if tokio::fs::metadata(path).await?.is_dir() {
        for entry in sorted_entries(path).await? {
            if let Some(name) = entry.file_name() {
                hasher.update(name.to_string_lossy().as_bytes());
            }
            hash_file(&entry, &mut hasher).await?;
        }
    } else {
        hash_file(path, &mut hasher).await?;
    }
    Ok(hex::encode(hasher.finalize()))
}

async fn hash_file(path: &Path, hasher: &mut Sha256) -> Result<()> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(())
}

async fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    let mut reader = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        if entry.file_type().await?.is_file() {
            entries.push(entry.path());
        }
    }
    entries.sort();
    Ok(entries)
}
