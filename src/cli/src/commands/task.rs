//! Task commands: inspect, list, cancel and re-run queued tasks.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use tabled::Tabled;

use dbvault_core::jobs::{TaskId, TaskInfo, TaskState};

use crate::output::{self, OutputFormat};
use crate::BrokerTarget;

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Show one task
    Show {
        /// Task ID
        task_id: String,
    },

    /// List tasks in a state across all queues
    List {
        /// pending, active, scheduled, retry, archived (or failed), completed
        #[arg(short, long, default_value = "pending")]
        state: String,

        /// Only tasks of this type, e.g. backup:execute
        #[arg(short = 't', long = "type")]
        task_type: Option<String>,

        /// Maximum number of results
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Cancel a task that has not started
    Cancel {
        /// Task ID
        task_id: String,
    },

    /// Run an archived, retrying or scheduled task now
    Retry {
        /// Task ID
        task_id: String,
    },
}

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    task_type: String,
    #[tabled(rename = "Queue")]
    queue: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Retried")]
    retried: String,
    #[tabled(rename = "Enqueued")]
    enqueued: String,
    #[tabled(rename = "Last Error")]
    last_error: String,
}

impl From<&TaskInfo> for TaskRow {
    fn from(t: &TaskInfo) -> Self {
        Self {
            id: t.id.to_string(),
            task_type: t.task_type.clone(),
            queue: t.queue.clone(),
            state: t.state.to_string(),
            retried: format!("{}/{}", t.retried, t.max_retry),
            enqueued: short_time(t.enqueued_at),
            last_error: t
                .last_error
                .as_deref()
                .map(|e| output::truncate(e, 40))
                .unwrap_or_else(|| "-".into()),
        }
    }
}

fn short_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn print_task(task: &TaskInfo, format: OutputFormat) -> Result<()> {
    if !matches!(format, OutputFormat::Table) {
        return output::print_item(task, format);
    }

    output::print_header(&format!("Task {}", task.id));
    output::print_detail("Type", &task.task_type);
    output::print_detail("Queue", &task.queue);
    output::print_detail("State", task.state.as_str());
    output::print_detail("Retried", &format!("{} of {}", task.retried, task.max_retry));
    output::print_detail("Timeout", &format!("{}s", task.timeout.as_secs()));
    output::print_detail("Enqueued", &short_time(task.enqueued_at));
    if let Some(deadline) = task.deadline {
        output::print_detail("Deadline", &short_time(deadline));
    }
    if let Some(next) = task.next_run_at {
        output::print_detail("Next run", &short_time(next));
    }
    if let Some(done) = task.completed_at {
        output::print_detail("Completed", &short_time(done));
    }
    if let Some(err) = &task.last_error {
        output::print_detail("Last error", err);
    }
    if let Some(failed) = task.last_failed_at {
        output::print_detail("Last failed", &short_time(failed));
    }
    output::print_detail("Payload", &serde_json::to_string(&task.payload)?);
    Ok(())
}

pub async fn execute(cmd: TaskCommands, target: &BrokerTarget, format: OutputFormat) -> Result<()> {
    let broker = target.connect().await?;
    let queue = broker.queue();

    match cmd {
        TaskCommands::Show { task_id } => {
            let id: TaskId = task_id.parse()?;
            let task = queue.get_by_id(&id).await?;
            print_task(&task, format)?;
        }

        TaskCommands::List { state, task_type, limit } => {
            let state: TaskState = state.parse()?;
            let mut tasks = queue.list(task_type.as_deref(), state).await?;
            tasks.sort_by_key(|t| t.enqueued_at);
            tasks.truncate(limit);

            let rows: Vec<TaskRow> = tasks.iter().map(TaskRow::from).collect();
            output::print_list(&rows, &tasks, format)?;
        }

        TaskCommands::Cancel { task_id } => {
            let id: TaskId = task_id.parse()?;
            queue.cancel(&id).await?;
            output::print_success(&format!("Task {} cancelled", id));
        }

        TaskCommands::Retry { task_id } => {
            let id: TaskId = task_id.parse()?;
            let task = queue.force_retry(&id).await?;
            match format {
                OutputFormat::Table => output::print_success(&format!(
                    "Task {} moved to {} on queue '{}'",
                    task.id, task.state, task.queue
                )),
                _ => output::print_item(&task, format)?,
            }
        }
    }

    Ok(())
}
