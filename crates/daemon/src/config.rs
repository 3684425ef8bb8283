//! Daemon configuration

use serde::{Deserialize, Serialize};
use sitewarden_common::RenderContext;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// Web server configuration
    pub web_server: WebServerConfig,

    /// Site defaults
    pub sites: SitesConfig,

    /// Certificate configuration
    pub tls: TlsConfig,

    /// Reachability monitor configuration
    pub monitor: MonitorConfig,

    /// Database-existence probe configuration
    pub database_probe: DatabaseProbeConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: sitewarden_common::default_store_path(),
            web_server: WebServerConfig::default(),
            sites: SitesConfig::default(),
            tls: TlsConfig::default(),
            monitor: MonitorConfig::default(),
            database_probe: DatabaseProbeConfig::default(),
        }
    }
}

/// nginx-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebServerConfig {
    /// Directory containing the available/enabled directories
    pub config_root: PathBuf,

    /// Name of the directory holding rendered artifacts
    pub available_dir: String,

    /// Name of the directory holding enabled links
    pub enabled_dir: String,

    /// nginx binary used for syntax checks
    pub binary: String,

    /// systemd unit name
    pub service: String,

    /// PHP-FPM socket directory
    pub php_socket_dir: PathBuf,

    /// Per-site log directory
    pub log_dir: PathBuf,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            config_root: PathBuf::from("/etc/nginx"),
            available_dir: "sites-available".to_string(),
            enabled_dir: "sites-enabled".to_string(),
            binary: "nginx".to_string(),
            service: "nginx".to_string(),
            php_socket_dir: PathBuf::from("/var/run/php"),
            log_dir: PathBuf::from("/var/log/nginx"),
        }
    }
}

/// Site defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SitesConfig {
    /// Parent directory of per-domain web roots
    pub web_root_base: PathBuf,

    /// Owner applied to new web roots; empty skips the fix-up
    pub owner: String,
}

impl Default for SitesConfig {
    fn default() -> Self {
        Self {
            web_root_base: PathBuf::from("/home"),
            owner: "www-data".to_string(),
        }
    }
}

/// Certificate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Root of the per-domain certificate directories
    pub cert_root: PathBuf,

    /// Certificate tool binary
    pub tool: String,

    /// Contact email; `admin@{domain}` when unset
    pub default_email: Option<String>,

    /// Hours between renewal runs
    pub renew_interval_hours: u64,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_root: PathBuf::from("/etc/letsencrypt/live"),
            tool: "certbot".to_string(),
            default_email: None,
            renew_interval_hours: 12,
        }
    }
}

impl TlsConfig {
    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_hours.saturating_mul(3600))
    }
}

/// Reachability monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,

    /// Seconds between passes
    pub interval_secs: u64,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    pub max_redirects: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 600,
            timeout_secs: 10,
            max_redirects: 5,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Database-existence probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseProbeConfig {
    /// Native MySQL client binary
    pub client: String,

    pub user: String,

    /// Containers tried in order after the native client
    pub containers: Vec<String>,

    /// Password used inside containers
    pub container_password: Option<String>,
}

impl Default for DatabaseProbeConfig {
    fn default() -> Self {
        Self {
            client: "mysql".to_string(),
            user: "root".to_string(),
            containers: vec!["sitewarden-mysql".to_string()],
            container_password: Some("root".to_string()),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Configuration rooted in a scratch directory, for tests and dry runs
    pub fn rooted_at(root: &std::path::Path) -> Self {
        let mut config = Self::default();
        config.store_path = root.join("store");
        config.web_server.config_root = root.join("nginx");
        config.web_server.log_dir = root.join("logs");
        config.sites.web_root_base = root.join("www");
        config.sites.owner = String::new();
        config.tls.cert_root = root.join("certs");
        config
    }

    /// Get the registry database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("sites.db")
    }

    /// Directory holding rendered artifacts
    pub fn available_path(&self) -> PathBuf {
        self.web_server.config_root.join(&self.web_server.available_dir)
    }

    /// Directory holding enabled links
    pub fn enabled_path(&self) -> PathBuf {
        self.web_server.config_root.join(&self.web_server.enabled_dir)
    }

    /// Default web root for a domain
    pub fn default_web_root(&self, domain: &str) -> PathBuf {
        self.sites.web_root_base.join(domain)
    }

    /// Paths the vhost templates refer to
    pub fn render_context(&self) -> RenderContext {
        RenderContext {
            php_socket_dir: self.web_server.php_socket_dir.clone(),
            log_dir: self.web_server.log_dir.clone(),
            cert_root: self.tls.cert_root.clone(),
        }
    }
}
