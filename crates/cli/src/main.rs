//! Sitewarden CLI - Main Entry Point

use clap::{Parser, Subcommand};
use sitewarden_cli::client::{HostClient, HostOptions};
use sitewarden_cli::commands::{cert, monitor, server, site};
use sitewarden_cli::output::{self, print_error};
use std::path::PathBuf;

/// Sitewarden - site lifecycle manager for nginx hosts
#[derive(Parser)]
#[command(name = "sitewarden")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SITEWARDEN_CONFIG", global = true,
          default_value_os_t = sitewarden_common::default_config_path())]
    config: PathBuf,

    /// Store directory
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Show what would change without touching the host
    #[arg(long, global = true)]
    dry_run: bool,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage sites
    #[command(subcommand)]
    Site(site::SiteCommands),

    /// Manage TLS certificates
    #[command(subcommand)]
    Cert(cert::CertCommands),

    /// Control the web server
    #[command(subcommand)]
    Server(server::ServerCommands),

    /// Reachability checks
    #[command(subcommand)]
    Monitor(monitor::MonitorCommands),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Version = cli.command {
        println!("Sitewarden CLI v{}", sitewarden_common::VERSION);
        return Ok(());
    }

    let client = HostClient::open(&HostOptions {
        config: cli.config,
        store: cli.store,
        dry_run: cli.dry_run,
    })?;

    let result = match cli.command {
        Commands::Site(cmd) => site::execute(cmd, &client, cli.format).await,
        Commands::Cert(cmd) => cert::execute(cmd, &client, cli.format).await,
        Commands::Server(cmd) => server::execute(cmd, &client, cli.format).await,
        Commands::Monitor(cmd) => monitor::execute(cmd, &client, cli.format).await,
        Commands::Version => Ok(()),
    };

    client.finish()?;
    result
}
