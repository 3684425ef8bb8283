//! Site Commands

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use sitewarden_common::{CreateSiteRequest, Site, SiteReport, SiteState, SiteUpdate};
use sitewarden_daemon::{SiteListing, UnmanagedSite};
use std::path::PathBuf;

use crate::client::HostClient;
use crate::output::{
    or_dash, print_item, print_list, print_partial_failures, print_success, OutputFormat,
    TableDisplay,
};

#[derive(Subcommand)]
pub enum SiteCommands {
    /// List registered sites
    List,

    /// Show a site's record
    Get {
        /// Domain name
        domain: String,
    },

    /// Create a site and enable its vhost
    Create {
        /// Domain name
        domain: String,

        /// Site type (php, laravel, nodejs, python, java, proxy, ...)
        #[arg(short = 't', long = "type", default_value = "php")]
        site_type: String,

        /// Web root, defaults to {web_root_base}/{domain}
        #[arg(long)]
        web_root: Option<PathBuf>,

        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Backend port for proxied applications
        #[arg(short, long)]
        backend_port: Option<u16>,

        /// PHP runtime version, e.g. 8.2
        #[arg(long)]
        php: Option<String>,

        /// Request a TLS certificate
        #[arg(long)]
        tls: bool,

        /// Contact email for the certificate
        #[arg(long)]
        email: Option<String>,

        /// List this site first
        #[arg(long)]
        featured: bool,
    },

    /// Change a site's settings and regenerate its vhost
    Update {
        /// Domain name
        domain: String,

        /// Site type
        #[arg(short = 't', long = "type")]
        site_type: Option<String>,

        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Backend port
        #[arg(short, long)]
        backend_port: Option<u16>,

        /// PHP runtime version; an empty value clears it
        #[arg(long)]
        php: Option<String>,

        /// Featured flag
        #[arg(long)]
        featured: Option<bool>,
    },

    /// Remove a site's vhost and registry record (web root and certificates are kept)
    Delete {
        /// Domain name
        domain: String,
    },

    /// Serve a site over TLS using its existing certificate
    EnableTls {
        /// Domain name
        domain: String,
    },

    /// Stop serving a site over TLS
    DisableTls {
        /// Domain name
        domain: String,
    },

    /// Find enabled vhosts that are not in the registry
    Discover,
}

impl TableDisplay for SiteListing {
    fn headers() -> Vec<&'static str> {
        vec!["", "Domain", "Type", "State", "Code", "TLS", "Certificate", "DB", "Checked"]
    }

    fn row(&self) -> Vec<String> {
        let site = &self.site;
        let state = match self.state {
            SiteState::Active { .. } => "active".green().to_string(),
            SiteState::Error => "error".red().to_string(),
            SiteState::NoDirectory => "no directory".yellow().to_string(),
            SiteState::Provisioning => "provisioning".dimmed().to_string(),
        };
        let certificate = match &self.certificate {
            Some(cert) if cert.is_valid => format!("{}d", cert.days_left),
            Some(_) => "expired".red().to_string(),
            None => "-".to_string(),
        };

        vec![
            if site.featured { "★".to_string() } else { String::new() },
            site.domain.clone(),
            site.site_type.to_string(),
            state,
            site.status_code.to_string(),
            yes_no(site.tls_enabled),
            certificate,
            yes_no(self.has_database),
            checked_at(site),
        ]
    }
}

impl TableDisplay for Site {
    fn headers() -> Vec<&'static str> {
        vec![
            "Domain", "Type", "Web Root", "Port", "Backend", "PHP", "TLS", "Status", "Code",
            "Checked",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.domain.clone(),
            self.site_type.to_string(),
            self.web_root.display().to_string(),
            self.listen_port.to_string(),
            if self.backend_port > 0 {
                self.backend_port.to_string()
            } else {
                "-".to_string()
            },
            or_dash(self.php_runtime_version.as_deref()),
            yes_no(self.tls_enabled),
            or_dash(self.status),
            self.status_code.to_string(),
            checked_at(self),
        ]
    }
}

impl TableDisplay for UnmanagedSite {
    fn headers() -> Vec<&'static str> {
        vec!["Domain", "Type", "Port", "Backend", "PHP", "Web Root", "Artifact"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.domain.clone(),
            or_dash(self.fields.site_type),
            or_dash(self.fields.listen_port),
            or_dash(self.fields.backend_port),
            or_dash(self.fields.php_runtime_version.as_deref()),
            or_dash(self.fields.web_root().map(|p| p.display().to_string())),
            self.artifact.display().to_string(),
        ]
    }
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

fn checked_at(site: &Site) -> String {
    or_dash(
        site.last_checked_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string()),
    )
}

fn report(message: &str, report: &SiteReport, format: OutputFormat) {
    if report.is_clean() {
        print_success(message);
    } else {
        print_success(&format!("{} with warnings", message));
        print_partial_failures(&report.partial_failures);
    }
    print_item(&report.site, format);
}

pub async fn execute(cmd: SiteCommands, client: &HostClient, format: OutputFormat) -> Result<()> {
    let manager = client.manager();

    match cmd {
        SiteCommands::List => {
            let sites = manager.list().await?;
            print_list(&sites, format);
        }

        SiteCommands::Get { domain } => {
            let site = manager.get(&domain)?;
            print_item(&site, format);
        }

        SiteCommands::Create {
            domain,
            site_type,
            web_root,
            port,
            backend_port,
            php,
            tls,
            email,
            featured,
        } => {
            let request = CreateSiteRequest {
                domain,
                site_type,
                web_root,
                listen_port: port,
                backend_port,
                php_runtime_version: php,
                tls,
                email,
                featured,
            };
            let result = manager.create(&request).await?;
            report(&format!("Site '{}' created", result.site.domain), &result, format);
        }

        SiteCommands::Update {
            domain,
            site_type,
            port,
            backend_port,
            php,
            featured,
        } => {
            let changes = SiteUpdate {
                site_type,
                listen_port: port,
                backend_port,
                php_runtime_version: php,
                featured,
            };
            let result = manager.update(&domain, &changes).await?;
            let message = if result.config_changed {
                format!("Site '{}' updated", domain)
            } else {
                format!("Site '{}' already up to date", domain)
            };
            report(&message, &result, format);
        }

        SiteCommands::Delete { domain } => {
            let result = manager.delete(&domain).await?;
            print_success(&format!(
                "Site '{}' deleted ({} artifacts removed)",
                domain,
                result.removed.len()
            ));
            print_partial_failures(&result.partial_failures);
        }

        SiteCommands::EnableTls { domain } => {
            let result = manager.enable_tls(&domain).await?;
            report(&format!("TLS enabled for '{}'", domain), &result, format);
        }

        SiteCommands::DisableTls { domain } => {
            let result = manager.disable_tls(&domain).await?;
            report(&format!("TLS disabled for '{}'", domain), &result, format);
        }

        SiteCommands::Discover => {
            let found = manager.discover_unmanaged().await?;
            print_list(&found, format);
        }
    }

    Ok(())
}
