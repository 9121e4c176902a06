//! External tool discovery.
//!
//! Tools are located once when the registry is built. A tool that cannot be
//! found is recorded as absent; jobs that need it fail with "tool not found"
//! instead of the worker refusing to start.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, VaultError};

/// Every external binary the executor knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tool {
    PgDump,
    PgRestore,
    Psql,
    MysqlDump,
    Mysql,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
    Lz4,
}

impl Tool {
    pub const ALL: [Tool; 10] = [
        Tool::PgDump,
        Tool::PgRestore,
        Tool::Psql,
        Tool::MysqlDump,
        Tool::Mysql,
        Tool::Gzip,
        Tool::Bzip2,
        Tool::Xz,
        Tool::Zstd,
        Tool::Lz4,
    ];

    /// Executable name looked up on `PATH`.
    pub fn binary_name(&self) -> &'static str {
        match self {
            Tool::PgDump => "pg_dump",
            Tool::PgRestore => "pg_restore",
            Tool::Psql => "psql",
            Tool::MysqlDump => "mysqldump",
            Tool::Mysql => "mysql",
            Tool::Gzip => "gzip",
            Tool::Bzip2 => "bzip2",
            Tool::Xz => "xz",
            Tool::Zstd => "zstd",
            Tool::Lz4 => "lz4",
        }
    }

    pub fn from_binary_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.binary_name() == name)
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

/// Resolved paths for every known tool.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    located: BTreeMap<Tool, Option<PathBuf>>,
}

impl ToolRegistry {
    /// Locate every tool, preferring explicit overrides over `PATH`.
    ///
    /// Override keys are binary names (`pg_dump`, `zstd`, ...). Unknown keys
    /// are ignored with a warning.
    pub fn discover(overrides: &BTreeMap<String, PathBuf>) -> Self {
        for key in overrides.keys() {
            if Tool::from_binary_name(key).is_none() {
                tracing::warn!(tool = %key, "Ignoring path override for unknown tool");
            }
        }

        let located = Tool::ALL
            .into_iter()
            .map(|tool| {
                let path = match overrides.get(tool.binary_name()) {
                    Some(path) if is_executable(path) => Some(path.clone()),
                    Some(path) => {
                        tracing::warn!(tool = %tool, path = %path.display(), "Configured tool path is not an executable file");
                        None
                    }
                    None => find_on_path(tool.binary_name()),
                };
                match &path {
                    Some(p) => tracing::debug!(tool = %tool, path = %p.display(), "Located tool"),
                    None => tracing::info!(tool = %tool, "Tool not available"),
                }
                (tool, path)
            })
            .collect();

        Self { located }
    }

    /// Registry with exactly the given tools present; everything else absent.
    pub fn from_paths(paths: impl IntoIterator<Item = (Tool, PathBuf)>) -> Self {
        let mut located: BTreeMap<Tool, Option<PathBuf>> =
            Tool::ALL.into_iter().map(|t| (t, None)).collect();
        for (tool, path) in paths {
            located.insert(tool, Some(path));
        }
        Self { located }
    }

    /// Resolved path, or a "tool not found" error.
    pub fn path(&self, tool: Tool) -> Result<&Path> {
        self.located
            .get(&tool)
            .and_then(|p| p.as_deref())
            .ok_or_else(|| VaultError::tool_not_found(tool.binary_name()))
    }

    pub fn is_available(&self, tool: Tool) -> bool {
        self.path(tool).is_ok()
    }

    pub fn available(&self) -> Vec<(Tool, &Path)> {
        self.located
            .iter()
            .filter_map(|(tool, path)| path.as_deref().map(|p| (*tool, p)))
            .collect()
    }

    pub fn missing(&self) -> Vec<Tool> {
        self.located
            .iter()
            .filter(|(_, path)| path.is_none())
            .map(|(tool, _)| *tool)
            .collect()
    }

    /// Fail with one error naming every missing tool.
    pub fn validate_tools_available(&self) -> Result<()> {
        self.require(&Tool::ALL)
    }

    /// Like [`validate_tools_available`](Self::validate_tools_available) but
    /// restricted to `tools`.
    pub fn require(&self, tools: &[Tool]) -> Result<()> {
        let missing: Vec<&str> = tools
            .iter()
            .filter(|t| !self.is_available(**t))
            .map(|t| t.binary_name())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(VaultError::tool_not_found(missing.join(", ")).with_context("missing", &missing))
    }
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_binary_names_round_trip() {
        for tool in Tool::ALL {
            assert_eq!(Tool::from_binary_name(tool.binary_name()), Some(tool));
        }
        assert_eq!(Tool::from_binary_name("sqlite3"), None);
    }

    #[test]
    fn test_missing_tools_are_all_named() {
        let registry = ToolRegistry::from_paths([(Tool::Gzip, PathBuf::from("/bin/gzip"))]);
        let err = registry
            .require(&[Tool::PgDump, Tool::Gzip, Tool::Zstd])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ToolNotFound);
        assert!(err.user_message().contains("pg_dump"));
        assert!(err.user_message().contains("zstd"));
        assert!(!err.user_message().contains("gzip"));
    }

    #[test]
    fn test_path_for_absent_tool() {
        let registry = ToolRegistry::from_paths([]);
        let err = registry.path(Tool::PgDump).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ToolNotFound);
        assert_eq!(registry.missing().len(), Tool::ALL.len());
    }

    #[test]
    fn test_override_to_missing_file_is_absent() {
        let overrides = BTreeMap::from([(
            "pg_dump".to_string(),
            PathBuf::from("/definitely/not/here/pg_dump"),
        )]);
        let registry = ToolRegistry::discover(&overrides);
        assert!(!registry.is_available(Tool::PgDump));
    }
}
