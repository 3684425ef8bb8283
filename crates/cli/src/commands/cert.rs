//! Certificate Commands

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use sitewarden_common::CertificateInfo;

use crate::client::HostClient;
use crate::output::{print_item, print_list, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum CertCommands {
    /// Install the certificate tool if it is missing
    Install,

    /// List certificates on disk
    List,

    /// Show a certificate's expiry
    Show {
        /// Domain name
        domain: String,
    },

    /// Obtain a certificate for a domain and www.domain
    Obtain {
        /// Domain name
        domain: String,

        /// Contact email, defaults to admin@{domain}
        #[arg(long)]
        email: Option<String>,
    },

    /// Renew one certificate, or every due certificate
    Renew {
        /// Domain name; all certificates when omitted
        domain: Option<String>,
    },

    /// Revoke and delete a certificate
    Revoke {
        /// Domain name
        domain: String,
    },
}

impl TableDisplay for CertificateInfo {
    fn headers() -> Vec<&'static str> {
        vec!["Domain", "Issuer", "Expires", "Days Left", "Valid", "Path"]
    }

    fn row(&self) -> Vec<String> {
        let days = if !self.is_valid {
            self.days_left.to_string().red().to_string()
        } else if self.days_left < 14 {
            self.days_left.to_string().yellow().to_string()
        } else {
            self.days_left.to_string()
        };

        vec![
            self.domain.clone(),
            self.issuer.clone(),
            self.expires_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            days,
            if self.is_valid { "yes" } else { "no" }.to_string(),
            self.path.display().to_string(),
        ]
    }
}

pub async fn execute(cmd: CertCommands, client: &HostClient, format: OutputFormat) -> Result<()> {
    let manager = client.manager();
    let certs = manager.certs();

    match cmd {
        CertCommands::Install => {
            certs.ensure_tool().await?;
            print_success("Certificate tool is installed");
        }

        CertCommands::List => {
            let list = certs.list_certificates()?;
            print_list(&list, format);
        }

        CertCommands::Show { domain } => {
            let info = certs.check_expiry(&domain)?;
            if !info.is_usable() {
                print_warning(&format!("Certificate for '{}' is not usable", domain));
            }
            print_item(&info, format);
        }

        CertCommands::Obtain { domain, email } => {
            if manager.store().find(&domain)?.is_some() {
                manager.issue_certificate(&domain, email.as_deref()).await?;
            } else {
                certs.obtain(&domain, email.as_deref()).await?;
            }
            print_success(&format!("Certificate obtained for '{}'", domain));
        }

        CertCommands::Renew { domain: Some(domain) } => {
            certs.renew(&domain).await?;
            print_success(&format!("Certificate for '{}' renewed", domain));
        }

        CertCommands::Renew { domain: None } => {
            certs.renew_all().await?;
            print_success("Due certificates renewed");
        }

        CertCommands::Revoke { domain } => {
            manager.revoke_certificate(&domain).await?;
            print_success(&format!("Certificate for '{}' revoked and deleted", domain));
        }
    }

    Ok(())
}
