//! Health check command.
//!
//! Runs the broker and tool checks locally and exits non-zero when unhealthy.

use anyhow::Result;
use clap::Args;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dbvault_core::executor::ToolRegistry;
use dbvault_core::health::{
    ComponentHealth, HealthConfig, HealthReport, HealthService, QueueHealthChecker, StartMarker,
    ToolsHealthChecker,
};

use crate::output::{self, OutputFormat};
use crate::BrokerTarget;

#[derive(Args)]
pub struct HealthArgs {
    /// Include component metadata
    #[arg(short, long)]
    detailed: bool,

    /// Per-check timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,
}

async fn run_checks(args: &HealthArgs, target: &BrokerTarget) -> HealthReport {
    let mut service = HealthService::new(
        HealthConfig {
            check_timeout: Duration::from_secs(args.timeout),
            service: "dbvault-cli".into(),
        },
        StartMarker::now(),
    );
    service.register_checker(Arc::new(ToolsHealthChecker::new(Arc::new(
        ToolRegistry::discover(&BTreeMap::new()),
    ))));

    match target.connect().await {
        Ok(broker) => {
            service.register_checker(Arc::new(QueueHealthChecker::new(broker.queue().clone())));
            service.check_health().await
        }
        Err(e) => service.check_health().await.with_component(
            ComponentHealth::unhealthy("broker").with_error(format!("{:#}", e)),
        ),
    }
}

pub async fn execute(args: HealthArgs, target: &BrokerTarget, format: OutputFormat) -> Result<i32> {
    let report = run_checks(&args, target).await;

    match format {
        OutputFormat::Table => {
            output::print_header("System Health");
            output::print_detail("Status", &report.status.to_string());
            output::print_detail("Broker", &target.url_for_display());
            output::print_detail("Version", &report.version);

            for component in &report.components {
                let mut line = component.status.to_string();
                if let Some(ms) = component.latency_ms {
                    line.push_str(&format!(" ({}ms)", ms));
                }
                if let Some(msg) = component.message.as_ref().or(component.error.as_ref()) {
                    line.push_str(&format!(" - {}", msg));
                }
                output::print_detail(&component.name, &line);

                if args.detailed {
                    let mut keys: Vec<_> = component.metadata.keys().collect();
                    keys.sort();
                    for key in keys {
                        output::print_detail(&format!("  {}", key), &component.metadata[key].to_string());
                    }
                }
            }
        }
        _ => output::print_item(&report, format)?,
    }

    Ok(report.status.exit_code())
}
