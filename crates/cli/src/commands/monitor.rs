//! Monitor Commands

use anyhow::Result;
use clap::Subcommand;
use sitewarden_daemon::{HttpProber, PassReport, ReachabilityMonitor};
use std::sync::Arc;

use crate::client::HostClient;
use crate::output::{print_item, print_warning, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum MonitorCommands {
    /// Probe every site once and record the results
    Run,
}

impl TableDisplay for PassReport {
    fn headers() -> Vec<&'static str> {
        vec!["Started", "Probed", "Active", "Error", "Update Failures"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            self.probed.to_string(),
            self.active.to_string(),
            self.errors.to_string(),
            self.update_failures.len().to_string(),
        ]
    }
}

pub async fn execute(cmd: MonitorCommands, client: &HostClient, format: OutputFormat) -> Result<()> {
    let manager = client.manager();

    match cmd {
        MonitorCommands::Run => {
            let settings = &manager.config().monitor;
            let prober = Arc::new(HttpProber::new(settings)?);
            let monitor = ReachabilityMonitor::new(manager.store().clone(), prober, settings);

            let report = monitor.run_pass().await?;
            for (domain, reason) in &report.update_failures {
                print_warning(&format!("Could not record result for {}: {}", domain, reason));
            }
            print_item(&report, format);
        }
    }

    Ok(())
}
