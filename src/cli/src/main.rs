//! DbVault CLI - operator tooling for backup queues and tasks.
//!
//! Talks to the broker directly; no worker process needs to be running.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config, health, queue, task, tools};
use output::OutputFormat;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_KEY_PREFIX: &str = "dbvault";

/// DbVault - queued database backup and restore
#[derive(Parser)]
#[command(
    name = "dbvault",
    author = "Aezi <aezi.zhu@icloud.com>",
    version = "0.1.0",
    about = "DbVault - queued database backup and restore",
    long_about = "Inspect and manage DbVault job queues, tasks, dump tools and broker health.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Broker URL
    #[arg(long, global = true, env = "DBVAULT_REDIS_URL")]
    redis_url: Option<String>,

    /// Key prefix shared with the workers
    #[arg(long, global = true, env = "DBVAULT_KEY_PREFIX")]
    key_prefix: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue (lane) operations
    #[command(subcommand)]
    Queue(queue::QueueCommands),

    /// Task inspection and control
    #[command(subcommand)]
    Task(task::TaskCommands),

    /// Dump and compression tool discovery
    #[command(subcommand)]
    Tools(tools::ToolsCommands),

    /// Check broker and tool health
    Health(health::HealthArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let target = BrokerTarget {
        url: cli
            .redis_url
            .clone()
            .or_else(|| config::load_value(config::REDIS_URL_KEY))
            .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
        prefix: cli
            .key_prefix
            .clone()
            .or_else(|| config::load_value(config::KEY_PREFIX_KEY))
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
    };
    let format = cli.output;

    let result = match cli.command {
        Commands::Queue(cmd) => queue::execute(cmd, &target, format).await.map(|_| 0),
        Commands::Task(cmd) => task::execute(cmd, &target, format).await.map(|_| 0),
        Commands::Tools(cmd) => tools::execute(cmd, format).await,
        Commands::Health(args) => health::execute(args, &target, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await.map(|_| 0),
    };

    match result {
        Ok(code) => {
            if code != 0 {
                std::process::exit(code);
            }
        }
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Where queue commands connect; resolved from flags, env and stored config.
pub struct BrokerTarget {
    pub url: String,
    pub prefix: String,
}

impl BrokerTarget {
    pub async fn connect(&self) -> Result<client::Broker> {
        client::Broker::connect(&self.url, &self.prefix).await
    }

    pub fn url_for_display(&self) -> String {
        client::redacted(&self.url)
    }
}
