//! Core types for Sitewarden

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// Default listen port for plain HTTP vhosts
pub const DEFAULT_LISTEN_PORT: u16 = 80;

/// Default upstream port for reverse-proxied applications
pub const DEFAULT_BACKEND_PORT: u16 = 3000;

/// Default upstream port for the `java` label
pub const DEFAULT_JAVA_BACKEND_PORT: u16 = 8080;

/// Site type, selecting the vhost template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum SiteType {
    /// Serves the web root directly and hands `*.php` to PHP-FPM
    StaticPhp,
    /// Like `StaticPhp` with the document root at `web_root/public`
    FrameworkPhp,
    /// Forwards everything to a local backend port
    ReverseProxy,
}

impl Default for SiteType {
    fn default() -> Self {
        Self::StaticPhp
    }
}

impl SiteType {
    /// Parse a site type label.
    ///
    /// Unknown and empty labels fall back to [`SiteType::StaticPhp`]; this
    /// never fails.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "framework_php" | "laravel" => SiteType::FrameworkPhp,
            "reverse_proxy" | "proxy" | "nodejs" | "python" | "java" => SiteType::ReverseProxy,
            _ => SiteType::StaticPhp,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SiteType::StaticPhp => "static_php",
            SiteType::FrameworkPhp => "framework_php",
            SiteType::ReverseProxy => "reverse_proxy",
        }
    }

    /// Whether PHP-FPM handles requests for this type
    pub fn is_php(&self) -> bool {
        matches!(self, SiteType::StaticPhp | SiteType::FrameworkPhp)
    }

    /// Default backend port for a label; zero for types without a backend
    pub fn default_backend_port(label: &str) -> u16 {
        match Self::from_label(label) {
            SiteType::ReverseProxy if label.trim().eq_ignore_ascii_case("java") => {
                DEFAULT_JAVA_BACKEND_PORT
            }
            SiteType::ReverseProxy => DEFAULT_BACKEND_PORT,
            _ => 0,
        }
    }
}

impl From<String> for SiteType {
    fn from(label: String) -> Self {
        SiteType::from_label(&label)
    }
}

impl std::fmt::Display for SiteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed site status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Active,
    Error,
    NoDirectory,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Active => "active",
            SiteStatus::Error => "error",
            SiteStatus::NoDirectory => "no_directory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SiteStatus::Active),
            "error" => Some(SiteStatus::Error),
            "no_directory" => Some(SiteStatus::NoDirectory),
            _ => None,
        }
    }
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hosted site, keyed by domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub domain: String,
    pub site_type: SiteType,
    pub web_root: PathBuf,
    pub listen_port: u16,
    /// Upstream port; only meaningful for reverse proxies
    pub backend_port: u16,
    pub php_runtime_version: Option<String>,
    pub tls_enabled: bool,
    /// Listing order only
    pub featured: bool,

    // Written by the reachability monitor and the creation-time
    // directory check only.
    pub status: Option<SiteStatus>,
    /// Last observed HTTP status, 0 when unreachable
    pub status_code: u16,
    pub last_checked_at: Option<DateTime<Utc>>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Site {
    /// Check the record invariants
    pub fn validate(&self) -> Result<()> {
        validate_domain(&self.domain)?;
        if self.listen_port == 0 {
            return Err(Error::Validation("listen_port must be positive".to_string()));
        }
        if self.site_type == SiteType::ReverseProxy && self.backend_port == 0 {
            return Err(Error::Validation(format!(
                "backend_port must be positive for reverse_proxy site {}",
                self.domain
            )));
        }
        if let Some(version) = &self.php_runtime_version {
            validate_php_version(version)?;
        }
        Ok(())
    }

    /// Effective lifecycle state of a registered site
    pub fn state(&self) -> SiteState {
        match self.status {
            None => SiteState::Provisioning,
            Some(SiteStatus::Active) => SiteState::Active {
                tls: self.tls_enabled,
            },
            Some(SiteStatus::Error) => SiteState::Error,
            Some(SiteStatus::NoDirectory) => SiteState::NoDirectory,
        }
    }

    /// URL scheme the monitor tries first
    pub fn primary_scheme(&self) -> &'static str {
        if self.tls_enabled {
            "https"
        } else {
            "http"
        }
    }
}

/// Lifecycle state derived from a registry record.
///
/// `NonExistent` and `Deleted` have no record and are therefore not
/// represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SiteState {
    /// Registered, not yet probed
    Provisioning,
    Active { tls: bool },
    Error,
    NoDirectory,
}

/// Input for site creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSiteRequest {
    pub domain: String,
    /// Site type label, see [`SiteType::from_label`]
    #[serde(default)]
    pub site_type: String,
    pub web_root: Option<PathBuf>,
    pub listen_port: Option<u16>,
    /// Zero is treated as unset
    pub backend_port: Option<u16>,
    pub php_runtime_version: Option<String>,
    #[serde(default)]
    pub tls: bool,
    /// Contact email for the certificate request
    pub email: Option<String>,
    #[serde(default)]
    pub featured: bool,
}

/// Field changes for an existing site
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteUpdate {
    pub site_type: Option<String>,
    pub listen_port: Option<u16>,
    pub backend_port: Option<u16>,
    /// An empty string clears the version
    pub php_runtime_version: Option<String>,
    pub featured: Option<bool>,
}

impl SiteUpdate {
    /// Apply the changes to a record and re-check its invariants
    pub fn apply_to(&self, site: &mut Site) -> Result<()> {
        if let Some(label) = &self.site_type {
            site.site_type = SiteType::from_label(label);
            if site.site_type == SiteType::ReverseProxy && site.backend_port == 0 {
                site.backend_port = SiteType::default_backend_port(label);
            }
        }
        if let Some(port) = self.listen_port {
            site.listen_port = port;
        }
        if let Some(port) = self.backend_port {
            site.backend_port = port;
        }
        if let Some(version) = &self.php_runtime_version {
            site.php_runtime_version = if version.trim().is_empty() {
                None
            } else {
                Some(version.trim().to_string())
            };
        }
        if let Some(featured) = self.featured {
            site.featured = featured;
        }
        site.validate()
    }
}

/// Result of one reachability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub status: SiteStatus,
    pub status_code: u16,
    pub checked_at: DateTime<Utc>,
}

impl ProbeOutcome {
    /// Any HTTP response counts as reachable, whatever its status
    pub fn reachable(status_code: u16, checked_at: DateTime<Utc>) -> Self {
        Self {
            status: SiteStatus::Active,
            status_code,
            checked_at,
        }
    }

    pub fn unreachable(checked_at: DateTime<Utc>) -> Self {
        Self {
            status: SiteStatus::Error,
            status_code: 0,
            checked_at,
        }
    }
}

/// Certificate details read from disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub domain: String,
    pub issuer: String,
    pub expires_at: DateTime<Utc>,
    pub days_left: i64,
    pub is_valid: bool,
    pub path: PathBuf,
}

impl CertificateInfo {
    /// Valid with at least one full day remaining
    pub fn is_usable(&self) -> bool {
        self.is_valid && self.days_left > 0
    }
}

/// Sub-step of a lifecycle operation that may fail softly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Permissions,
    Reload,
    Tls,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Permissions => write!(f, "permissions"),
            Step::Reload => write!(f, "reload"),
            Step::Tls => write!(f, "tls"),
        }
    }
}

/// A non-critical sub-step failed while the operation itself succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFailure {
    pub step: Step,
    pub message: String,
}

impl PartialFailure {
    pub fn new(step: Step, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
        }
    }
}

/// Outcome of a lifecycle operation
#[derive(Debug, Clone, Serialize)]
pub struct SiteReport {
    pub site: Site,
    /// False when nothing on disk needed to change
    pub config_changed: bool,
    pub partial_failures: Vec<PartialFailure>,
}

impl SiteReport {
    pub fn is_clean(&self) -> bool {
        self.partial_failures.is_empty()
    }
}

/// Validate a domain name used as a registry key and path component
pub fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() {
        return Err(Error::Validation("domain is required".to_string()));
    }
    if domain.len() > 253 {
        return Err(Error::Validation(format!("domain too long: {}", domain)));
    }
    if domain.starts_with('.') || domain.starts_with('-') || domain.ends_with('.') || domain.contains("..") {
        return Err(Error::Validation(format!("invalid domain: {}", domain)));
    }
    let valid = domain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-');
    if !valid {
        return Err(Error::Validation(format!("invalid domain: {}", domain)));
    }
    Ok(())
}

fn validate_php_version(version: &str) -> Result<()> {
    let valid = !version.is_empty() && version.chars().all(|c| c.is_ascii_digit() || c == '.');
    if !valid {
        return Err(Error::Validation(format!("invalid PHP version: {}", version)));
    }
    Ok(())
}

/// Database name for a domain: dots and dashes become underscores
pub fn database_name_for(domain: &str) -> String {
    domain.replace(['.', '-'], "_")
}
