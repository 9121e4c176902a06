//! Queue (lane) commands: counts, pausing and draining.

use anyhow::Result;
use clap::Subcommand;
use tabled::Tabled;

use dbvault_core::jobs::QueueInfo;

use crate::output::{self, OutputFormat};
use crate::BrokerTarget;

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Per-lane task counts and totals
    Stats,

    /// Known lane names
    List,

    /// Stop workers from taking tasks off a lane
    Pause { queue: String },

    /// Let workers consume a paused lane again
    Resume { queue: String },

    /// Delete a lane and every task in it
    Drop {
        queue: String,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Tabled)]
struct QueueRow {
    #[tabled(rename = "Queue")]
    queue: String,
    #[tabled(rename = "Pending")]
    pending: usize,
    #[tabled(rename = "Active")]
    active: usize,
    #[tabled(rename = "Scheduled")]
    scheduled: usize,
    #[tabled(rename = "Retry")]
    retry: usize,
    #[tabled(rename = "Archived")]
    archived: usize,
    #[tabled(rename = "Completed")]
    completed: usize,
    #[tabled(rename = "State")]
    state: &'static str,
}

impl From<&QueueInfo> for QueueRow {
    fn from(q: &QueueInfo) -> Self {
        Self {
            queue: q.queue.clone(),
            pending: q.pending,
            active: q.active,
            scheduled: q.scheduled,
            retry: q.retry,
            archived: q.archived,
            completed: q.completed,
            state: if q.paused { "paused" } else { "running" },
        }
    }
}

pub async fn execute(cmd: QueueCommands, target: &BrokerTarget, format: OutputFormat) -> Result<()> {
    if let QueueCommands::Drop { queue, yes: false } = &cmd {
        output::print_info(&format!(
            "This deletes queue '{}' and all of its tasks. Use --yes to confirm.",
            queue
        ));
        return Ok(());
    }

    let broker = target.connect().await?;
    let queue = broker.queue();

    match cmd {
        QueueCommands::Stats => {
            let stats = queue.stats().await?;
            let rows: Vec<QueueRow> = stats.queues.iter().map(QueueRow::from).collect();
            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Queues ({})", broker.display_url()));
                    output::print_list(&rows, &stats.queues, format)?;
                    println!(
                        "  total: {} pending, {} active, {} scheduled, {} retry, {} archived, {} completed",
                        stats.pending,
                        stats.active,
                        stats.scheduled,
                        stats.retry,
                        stats.archived,
                        stats.completed
                    );
                }
                _ => output::print_item(&stats, format)?,
            }
        }

        QueueCommands::List => {
            let names = queue.queue_names().await?;
            match format {
                OutputFormat::Table if names.is_empty() => output::print_info("No queues yet."),
                OutputFormat::Table => names.iter().for_each(|n| println!("{}", n)),
                _ => output::print_item(&names, format)?,
            }
        }

        QueueCommands::Pause { queue: name } => {
            queue.pause(&name).await?;
            output::print_success(&format!("Queue '{}' paused", name));
        }

        QueueCommands::Resume { queue: name } => {
            queue.resume(&name).await?;
            output::print_success(&format!("Queue '{}' resumed", name));
        }

        QueueCommands::Drop { queue: name, .. } => {
            let removed = queue.drop_queue(&name).await?;
            output::print_success(&format!("Queue '{}' dropped ({} tasks removed)", name, removed));
        }
    }

    Ok(())
}
