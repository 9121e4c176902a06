//! Configuration management commands.
//!
//! Stores CLI configuration in `<config dir>/dbvault/config.toml`.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::output::{self, OutputFormat};

pub const REDIS_URL_KEY: &str = "redis-url";
pub const KEY_PREFIX_KEY: &str = "key-prefix";

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show all configuration
    Show,

    /// Persist the broker URL used when --redis-url is not given
    SetRedisUrl {
        /// e.g. redis://localhost:6379
        url: String,
    },

    /// Persist the queue key prefix
    SetKeyPrefix { prefix: String },

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

/// Persistent CLI configuration stored on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

fn config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine the user config directory")?;
    Ok(base.join("dbvault").join("config.toml"))
}

fn load_from(path: &Path) -> Result<CliConfig> {
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn save_to(path: &Path, cfg: &CliConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Load a stored value, if the file exists and has it.
pub fn load_value(key: &str) -> Option<String> {
    let path = config_path().ok()?;
    load_from(&path).ok().and_then(|cfg| cfg.values.get(key).cloned())
}

fn store_value(key: &str, value: &str, format: OutputFormat) -> Result<()> {
    let path = config_path()?;
    let mut cfg = load_from(&path)?;
    cfg.values.insert(key.to_string(), value.to_string());
    save_to(&path, &cfg)?;

    match format {
        OutputFormat::Table => output::print_success(&format!("{} = {}", key, value)),
        _ => output::print_item(&serde_json::json!({ "key": key, "value": value }), format)?,
    }
    Ok(())
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::SetRedisUrl { url } => {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                anyhow::bail!("broker URL must start with redis:// or rediss://");
            }
            store_value(REDIS_URL_KEY, &url, format)?;
        }

        ConfigCommands::SetKeyPrefix { prefix } => store_value(KEY_PREFIX_KEY, &prefix, format)?,

        ConfigCommands::Show => {
            let path = config_path()?;
            let cfg = load_from(&path)?;

            if cfg.values.is_empty() {
                output::print_info("No configuration values set.");
                return Ok(());
            }

            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Configuration ({})", path.display()));
                    for (k, v) in &cfg.values {
                        output::print_detail(k, v);
                    }
                }
                _ => output::print_item(&cfg.values, format)?,
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::print_info("This will reset all CLI configuration. Use --force to confirm.");
                return Ok(());
            }

            let path = config_path()?;
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }

            output::print_success("Configuration reset to defaults");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        assert!(load_from(&path).unwrap().values.is_empty());

        let mut cfg = CliConfig::default();
        cfg.values.insert(REDIS_URL_KEY.into(), "redis://cache:6379".into());
        save_to(&path, &cfg).unwrap();

        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.values.get(REDIS_URL_KEY).map(String::as_str), Some("redis://cache:6379"));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "values = [").unwrap();
        assert!(load_from(&path).is_err());
    }
}
