//! Sitewarden Daemon
//!
//! Runs the reachability monitor and the certificate renewal scheduler
//! until interrupted.

use clap::Parser;
use sitewarden_common::{CommandRunner, SystemRunner};
use sitewarden_daemon::{
    open_store, CertManager, DaemonConfig, HttpProber, Nginx, ReachabilityMonitor,
    RenewalScheduler, WebServer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "sitewardend")]
#[command(about = "Sitewarden daemon - site reachability monitoring and certificate renewal")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SITEWARDEN_CONFIG", default_value_os_t = sitewarden_common::default_config_path())]
    config: PathBuf,

    /// Store directory
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Seconds between monitor passes
    #[arg(long)]
    interval: Option<u64>,

    /// Do not run the certificate renewal scheduler
    #[arg(long)]
    no_renewal: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Sitewarden daemon v{}", sitewarden_common::VERSION);

    let mut config = DaemonConfig::load(&cli.config)?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(interval) = cli.interval {
        config.monitor.interval_secs = interval;
    }

    let store = open_store(&config)?;
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);

    let monitor_handle = if config.monitor.enabled {
        let prober = Arc::new(HttpProber::new(&config.monitor)?);
        let monitor = ReachabilityMonitor::new(store.clone(), prober, &config.monitor);
        Some(tokio::spawn(async move { monitor.run().await }))
    } else {
        info!("Reachability monitor disabled");
        None
    };

    let renewal_handle = if cli.no_renewal {
        None
    } else {
        let certs = Arc::new(CertManager::new(config.tls.clone(), runner.clone()));
        let web_server: Arc<dyn WebServer> =
            Arc::new(Nginx::new(config.web_server.clone(), runner.clone()));
        let scheduler = RenewalScheduler::new(certs, web_server)
            .with_interval(config.tls.renew_interval());
        Some(tokio::spawn(scheduler.run()))
    };

    info!("Daemon started, registry at {:?}", config.db_path());

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    if let Some(handle) = monitor_handle {
        handle.abort();
    }
    if let Some(handle) = renewal_handle {
        handle.abort();
    }

    info!("Daemon shutdown complete");
    Ok(())
}
