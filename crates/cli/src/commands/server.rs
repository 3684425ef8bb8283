//! Web Server Commands

use anyhow::Result;
use clap::Subcommand;

use crate::client::HostClient;
use crate::output::{print_message, print_success, OutputFormat};

#[derive(Subcommand)]
pub enum ServerCommands {
    /// Show the web server's service state
    Status,

    /// Check the configuration syntax
    Test,

    /// Reload the configuration
    Reload,

    /// Restart the web server
    Restart,
}

pub async fn execute(cmd: ServerCommands, client: &HostClient, format: OutputFormat) -> Result<()> {
    let server = client.manager().web_server();

    match cmd {
        ServerCommands::Status => {
            let status = server.status().await?;
            print_message(&status, format);
        }
        ServerCommands::Test => {
            server.validate().await?;
            print_success("Configuration test passed");
        }
        ServerCommands::Reload => {
            server.reload().await?;
            print_success("Web server reloaded");
        }
        ServerCommands::Restart => {
            server.restart().await?;
            print_success("Web server restarted");
        }
    }

    Ok(())
}
