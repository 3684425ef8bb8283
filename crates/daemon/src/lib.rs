//! Sitewarden daemon library
//!
//! Site lifecycle orchestration, certificate management and reachability
//! monitoring. Used by both `sitewardend` and the `sitewarden` CLI.

pub mod certs;
pub mod config;
pub mod dbprobe;
pub mod monitor;
pub mod nginx;
pub mod renewal;
pub mod sites;
pub mod state;

pub use certs::CertManager;
pub use config::DaemonConfig;
pub use dbprobe::{DatabaseProbe, ProbeStrategy};
pub use monitor::{HttpProber, PassReport, Prober, ReachabilityMonitor};
pub use nginx::{Nginx, WebServer};
pub use renewal::RenewalScheduler;
pub use sites::{DeleteReport, SiteListing, SiteManager, UnmanagedSite};
pub use state::{open_store, MemorySiteStore, SiteStore};
