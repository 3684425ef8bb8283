//! Background certificate renewal
//!
//! Replaces a system cron entry: the daemon calls `certbot renew` shortly
//! after startup and then on a fixed interval.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::certs::CertManager;
use crate::nginx::WebServer;
use sitewarden_common::Result;

/// Default check interval (12 hours)
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(12 * 3600);

/// Minimum check interval (1 hour)
pub const MIN_RENEW_INTERVAL: Duration = Duration::from_secs(3600);

/// Maximum check interval (7 days)
pub const MAX_RENEW_INTERVAL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Delay before the first run after startup
const STARTUP_DELAY: Duration = Duration::from_secs(10);

/// Certificates closer than this to expiry are called out in the log
const EXPIRY_WARNING_DAYS: i64 = 14;

pub struct RenewalScheduler {
    certs: Arc<CertManager>,
    web_server: Arc<dyn WebServer>,
    interval: Duration,
}

impl RenewalScheduler {
    pub fn new(certs: Arc<CertManager>, web_server: Arc<dyn WebServer>) -> Self {
        Self {
            certs,
            web_server,
            interval: DEFAULT_RENEW_INTERVAL,
        }
    }

    /// Set the check interval, clamped between one hour and a week
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.clamp(MIN_RENEW_INTERVAL, MAX_RENEW_INTERVAL);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run forever
    pub async fn run(self) {
        info!(
            "Starting certificate renewal scheduler (every {}h)",
            self.interval.as_secs() / 3600
        );

        tokio::time::sleep(STARTUP_DELAY).await;

        let mut ticker = interval(self.interval);
        loop {
            ticker.tick().await;
            debug!("Running scheduled certificate renewal");

            if let Err(e) = self.run_once().await {
                error!("Certificate renewal failed: {}", e);
            }
        }
    }

    /// Renew due certificates, then reload so nginx serves the new ones
    pub async fn run_once(&self) -> Result<()> {
        self.certs.renew_all().await?;

        if let Err(e) = self.web_server.reload().await {
            warn!("Reload after renewal failed: {}", e);
        }

        for cert in self.certs.list_certificates()? {
            if !cert.is_valid {
                warn!("Certificate for {} has expired", cert.domain);
            } else if cert.days_left < EXPIRY_WARNING_DAYS {
                warn!(
                    "Certificate for {} still expires in {} days after renewal",
                    cert.domain, cert.days_left
                );
            }
        }

        Ok(())
    }
}
