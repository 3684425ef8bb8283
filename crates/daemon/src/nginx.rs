//! Web server controller
//!
//! Validates and signals the running nginx process. Nothing here touches
//! config artifacts on disk.

use async_trait::async_trait;
use sitewarden_common::{CommandRunner, Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::WebServerConfig;

/// Control surface of the external web server process
#[async_trait]
pub trait WebServer: Send + Sync {
    /// Syntax-check the on-disk configuration. Never mutates state.
    async fn validate(&self) -> Result<()>;

    /// Ask the running server to pick up new configuration
    async fn reload(&self) -> Result<()>;

    async fn restart(&self) -> Result<()>;

    /// Service state as reported by the service manager, e.g. "active"
    async fn status(&self) -> Result<String>;
}

/// nginx managed through systemd
pub struct Nginx {
    config: WebServerConfig,
    runner: Arc<dyn CommandRunner>,
}

impl Nginx {
    pub fn new(config: WebServerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    async fn systemctl(&self, action: &str) -> Result<()> {
        info!("systemctl {} {}", action, self.config.service);
        self.runner
            .run("systemctl", &[action, &self.config.service])
            .await?
            .into_result("systemctl")?;
        Ok(())
    }
}

#[async_trait]
impl WebServer for Nginx {
    async fn validate(&self) -> Result<()> {
        let output = self.runner.run(&self.config.binary, &["-t"]).await?;
        let diagnostic = output.combined();

        // nginx -t writes its verdict to stderr; an exit code of 0 alone is
        // not trusted
        if output.success && diagnostic.contains("successful") {
            debug!("nginx configuration test passed");
            Ok(())
        } else {
            warn!("nginx configuration test failed: {}", diagnostic);
            Err(Error::external(format!("{} -t", self.config.binary), diagnostic))
        }
    }

    async fn reload(&self) -> Result<()> {
        self.systemctl("reload").await
    }

    async fn restart(&self) -> Result<()> {
        self.systemctl("restart").await
    }

    async fn status(&self) -> Result<String> {
        // is-active exits non-zero for inactive units; the text is the answer
        let output = self
            .runner
            .run("systemctl", &["is-active", &self.config.service])
            .await?;
        let state = output.stdout.trim();
        Ok(if state.is_empty() {
            "unknown".to_string()
        } else {
            state.to_string()
        })
    }
}
