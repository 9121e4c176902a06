//! Dump and compression tool discovery.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tabled::Tabled;

use dbvault_core::executor::{Tool, ToolRegistry};

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ToolsCommands {
    /// Locate every tool the workers shell out to
    Check {
        /// Explicit binary location, e.g. pg_dump=/opt/pg16/bin/pg_dump
        #[arg(long = "path", value_name = "TOOL=PATH")]
        paths: Vec<String>,

        /// Exit non-zero when any tool is missing
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct ToolRow {
    #[tabled(rename = "Tool")]
    tool: String,
    #[tabled(rename = "Status")]
    status: &'static str,
    #[tabled(rename = "Path")]
    path: String,
}

fn parse_overrides(paths: &[String]) -> Result<BTreeMap<String, PathBuf>> {
    paths
        .iter()
        .map(|raw| {
            let (name, path) = raw
                .split_once('=')
                .with_context(|| format!("expected TOOL=PATH, got '{}'", raw))?;
            if Tool::from_binary_name(name).is_none() {
                anyhow::bail!("unknown tool '{}'", name);
            }
            Ok((name.to_string(), PathBuf::from(path)))
        })
        .collect()
}

fn rows(registry: &ToolRegistry) -> Vec<ToolRow> {
    Tool::ALL
        .iter()
        .map(|tool| match registry.path(*tool) {
            Ok(path) => ToolRow {
                tool: tool.to_string(),
                status: "found",
                path: path.display().to_string(),
            },
            Err(_) => ToolRow {
                tool: tool.to_string(),
                status: "missing",
                path: "-".into(),
            },
        })
        .collect()
}

pub async fn execute(cmd: ToolsCommands, format: OutputFormat) -> Result<i32> {
    match cmd {
        ToolsCommands::Check { paths, strict } => {
            let registry = ToolRegistry::discover(&parse_overrides(&paths)?);
            let rows = rows(&registry);
            output::print_list(&rows, &rows, format)?;

            let missing = registry.missing();
            if missing.is_empty() {
                return Ok(0);
            }
            if matches!(format, OutputFormat::Table) {
                let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
                output::print_warning(&format!("Missing: {}", names.join(", ")));
            }
            Ok(if strict { 1 } else { 0 })
        }
    }
}
