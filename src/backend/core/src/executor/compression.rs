//! Artifact compression through single-purpose compressor binaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;

use super::tools::{Tool, ToolRegistry};
use crate::error::{Result, VaultError};
use crate::telemetry::ToolMetrics;

/// Supported codecs. The set is closed; anything else is a configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    Gzip,
    Bzip2,
    Xz,
    Zstd,
    Lz4,
}

impl CompressionAlgorithm {
    pub const ALL: [CompressionAlgorithm; 5] = [
        CompressionAlgorithm::Gzip,
        CompressionAlgorithm::Bzip2,
        CompressionAlgorithm::Xz,
        CompressionAlgorithm::Zstd,
        CompressionAlgorithm::Lz4,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
            Self::Lz4 => "lz4",
        }
    }

    /// File extension including the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Gzip => ".gz",
            Self::Bzip2 => ".bz2",
            Self::Xz => ".xz",
            Self::Zstd => ".zst",
            Self::Lz4 => ".lz4",
        }
    }

    pub fn tool(&self) -> Tool {
        match self {
            Self::Gzip => Tool::Gzip,
            Self::Bzip2 => Tool::Bzip2,
            Self::Xz => Tool::Xz,
            Self::Zstd => Tool::Zstd,
            Self::Lz4 => Tool::Lz4,
        }
    }

    /// Codec implied by a path's final extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ALL
            .into_iter()
            .find(|alg| alg.extension()[1..].eq_ignore_ascii_case(ext))
    }

    /// `path` with this codec's extension appended.
    pub fn compressed_path(&self, path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_owned();
        os.push(self.extension());
        PathBuf::from(os)
    }

    fn compress_args(&self) -> &'static [&'static str] {
        match self {
            Self::Zstd => &["-q", "-c"],
            _ => &["-c"],
        }
    }

    fn decompress_args(&self) -> &'static [&'static str] {
        match self {
            Self::Zstd => &["-q", "-d", "-c"],
            _ => &["-d", "-c"],
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = VaultError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(Self::Gzip),
            "bzip2" | "bz2" => Ok(Self::Bzip2),
            "xz" => Ok(Self::Xz),
            "zstd" | "zst" => Ok(Self::Zstd),
            "lz4" => Ok(Self::Lz4),
            _ => Err(VaultError::unsupported_algorithm(s)),
        }
    }
}

/// Runs compressors found in the tool registry.
#[derive(Debug, Clone)]
pub struct Compressor {
    tools: Arc<ToolRegistry>,
}

impl Compressor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }

    /// Compress `input` into `output` with `algorithm`.
    ///
    /// On failure `output` may or may not exist; callers own its cleanup.
    pub async fn compress(
        &self,
        input: &Path,
        output: &Path,
        algorithm: CompressionAlgorithm,
    ) -> Result<()> {
        self.run(algorithm, algorithm.compress_args(), input, output)
            .await
    }

    /// Decompress `input` into `output`, picking the codec from `input`'s
    /// extension.
    pub async fn decompress(&self, input: &Path, output: &Path) -> Result<CompressionAlgorithm> {
        let algorithm = CompressionAlgorithm::from_path(input).ok_or_else(|| {
            VaultError::unsupported_algorithm(
                input
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )
        })?;
        self.run(algorithm, algorithm.decompress_args(), input, output)
            .await?;
        Ok(algorithm)
    }

    async fn run(
        &self,
        algorithm: CompressionAlgorithm,
        flags: &[&str],
        input: &Path,
        output: &Path,
    ) -> Result<()> {
        let tool = algorithm.tool();
        let program = self.tools.path(tool)?;
        let destination = tokio::fs::File::create(output).await?.into_std().await;

        tracing::debug!(
            tool = %tool,
            input = %input.display(),
            output = %output.display(),
            "Running compressor"
        );

        let spawned = tokio::process::Command::new(program)
            .args(flags)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::from(destination))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        // stdout stays redirected to the file; only stderr is collected
        let result = match spawned {
            Ok(child) => child.wait_with_output().await,
            Err(e) => Err(e),
        };

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                ToolMetrics::record_run(tool.binary_name(), false);
                return Err(VaultError::tool_execution_failed(tool.binary_name(), e.to_string()));
            }
        };

        ToolMetrics::record_run(tool.binary_name(), output.status.success());
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = match stderr.lines().last() {
                Some(line) => format!("{}: {}", output.status, line.trim()),
                None => output.status.to_string(),
            };
            return Err(VaultError::tool_execution_failed(tool.binary_name(), reason));
        }
        Ok(())
    }
}
