//! Certificate manager
//!
//! Issues, renews, inspects and revokes certificates through certbot.
//! Certificate material on disk is the only source of truth; nothing is
//! cached or persisted here.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use sitewarden_common::{validate_domain, CertificateInfo, CommandRunner, Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::TlsConfig;

/// certbot keeps account and renewal state that is not partitioned by
/// domain, so every mutating invocation in this process queues here.
static CERT_TOOL_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Packages installed when the tool is missing
const INSTALL_PACKAGES: [&str; 2] = ["certbot", "python3-certbot-nginx"];

const SECONDS_PER_DAY: i64 = 86_400;

pub struct CertManager {
    config: TlsConfig,
    runner: Arc<dyn CommandRunner>,
}

impl CertManager {
    pub fn new(config: TlsConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// `{cert_root}/{domain}`
    pub fn cert_dir(&self, domain: &str) -> PathBuf {
        self.config.cert_root.join(domain)
    }

    /// Whether the chain and key an nginx TLS block needs are on disk
    pub fn has_material(&self, domain: &str) -> bool {
        let dir = self.cert_dir(domain);
        dir.join("fullchain.pem").is_file() && dir.join("privkey.pem").is_file()
    }

    /// Install certbot if it is not on `PATH`
    pub async fn ensure_tool(&self) -> Result<()> {
        let _guard = CERT_TOOL_LOCK.lock().await;
        self.install_if_absent().await
    }

    async fn install_if_absent(&self) -> Result<()> {
        if self.runner.is_available(&self.config.tool).await {
            return Ok(());
        }

        for manager in ["apt-get", "dnf"] {
            if self.runner.is_available(manager).await {
                info!("Installing {} with {}", self.config.tool, manager);
                let mut args = vec!["install", "-y"];
                args.extend(INSTALL_PACKAGES);
                self.runner.run(manager, &args).await?.into_result(manager)?;
                return Ok(());
            }
        }

        Err(Error::external(
            self.config.tool.clone(),
            "unable to install: unsupported package manager",
        ))
    }

    /// Request a certificate covering `domain` and `www.{domain}`.
    ///
    /// certbot's own nginx edits (redirect, ssl directives) are accepted as
    /// they are. Renewal is left to the daemon's renewal scheduler.
    pub async fn obtain(&self, domain: &str, email: Option<&str>) -> Result<()> {
        validate_domain(domain)?;
        let email = self.contact_email(domain, email);
        let www = format!("www.{}", domain);

        let _guard = CERT_TOOL_LOCK.lock().await;
        self.install_if_absent().await?;

        info!("Requesting certificate for {} ({})", domain, email);
        self.runner
            .run(
                &self.config.tool,
                &[
                    "--nginx",
                    "-d",
                    domain,
                    "-d",
                    &www,
                    "--non-interactive",
                    "--agree-tos",
                    "--email",
                    &email,
                    "--redirect",
                ],
            )
            .await?
            .into_result(&self.config.tool)?;

        info!("Certificate issued for {}", domain);
        Ok(())
    }

    fn contact_email(&self, domain: &str, email: Option<&str>) -> String {
        email
            .filter(|e| !e.trim().is_empty())
            .map(|e| e.trim().to_string())
            .or_else(|| self.config.default_email.clone())
            .unwrap_or_else(|| format!("admin@{}", domain))
    }

    pub async fn renew(&self, domain: &str) -> Result<()> {
        validate_domain(domain)?;
        let _guard = CERT_TOOL_LOCK.lock().await;

        info!("Renewing certificate for {}", domain);
        self.runner
            .run(&self.config.tool, &["renew", "--cert-name", domain, "--quiet"])
            .await?
            .into_result(&self.config.tool)?;
        Ok(())
    }

    /// Renew every certificate that is due
    pub async fn renew_all(&self) -> Result<()> {
        let _guard = CERT_TOOL_LOCK.lock().await;

        info!("Renewing all due certificates");
        self.runner
            .run(&self.config.tool, &["renew", "--quiet"])
            .await?
            .into_result(&self.config.tool)?;
        Ok(())
    }

    /// Revoke then delete a certificate.
    ///
    /// When the revoke succeeds and the delete fails the material stays on
    /// disk in a revoked state; that is reported as
    /// [`Error::RevokedNotDeleted`].
    pub async fn revoke(&self, domain: &str) -> Result<()> {
        validate_domain(domain)?;
        let _guard = CERT_TOOL_LOCK.lock().await;

        info!("Revoking certificate for {}", domain);
        self.runner
            .run(
                &self.config.tool,
                &["revoke", "--cert-name", domain, "--non-interactive"],
            )
            .await?
            .into_result(&self.config.tool)?;

        let deleted = self
            .runner
            .run(
                &self.config.tool,
                &["delete", "--cert-name", domain, "--non-interactive"],
            )
            .await
            .and_then(|out| out.into_result(&self.config.tool));

        if let Err(e) = deleted {
            warn!("Certificate for {} revoked but not deleted: {}", domain, e);
            return Err(Error::RevokedNotDeleted {
                domain: domain.to_string(),
                diagnostic: e.to_string(),
            });
        }

        Ok(())
    }

    /// Read expiry details from `{cert_root}/{domain}/cert.pem`
    pub fn check_expiry(&self, domain: &str) -> Result<CertificateInfo> {
        validate_domain(domain)?;
        let dir = self.cert_dir(domain);
        let cert_path = dir.join("cert.pem");

        let pem = match std::fs::read(&cert_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("certificate", domain));
            }
            Err(e) => return Err(e.into()),
        };

        let (issuer, expires_at) = parse_certificate(&pem, &cert_path)?;
        Ok(certificate_info(domain, issuer, expires_at, dir, Utc::now()))
    }

    /// Whether a domain has a valid certificate with a day or more left
    pub fn is_usable(&self, domain: &str) -> bool {
        self.check_expiry(domain)
            .map(|info| info.is_usable())
            .unwrap_or(false)
    }

    /// Inspect every domain directory under the certificate root
    pub fn list_certificates(&self) -> Result<Vec<CertificateInfo>> {
        let entries = match std::fs::read_dir(&self.config.cert_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut certs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let domain = entry.file_name().to_string_lossy().to_string();
            match self.check_expiry(&domain) {
                Ok(info) => certs.push(info),
                Err(e) => debug!("Skipping {}: {}", domain, e),
            }
        }

        certs.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(certs)
    }
}

fn parse_certificate(pem: &[u8], path: &Path) -> Result<(String, DateTime<Utc>)> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(pem)
        .map_err(|e| Error::Certificate(format!("failed to parse PEM {:?}: {}", path, e)))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| Error::Certificate(format!("invalid X.509 certificate {:?}: {}", path, e)))?;

    let issuer = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();

    let not_after = cert.validity().not_after.timestamp();
    let expires_at = DateTime::<Utc>::from_timestamp(not_after, 0)
        .ok_or_else(|| Error::Certificate(format!("expiry out of range in {:?}", path)))?;

    Ok((issuer, expires_at))
}

fn certificate_info(
    domain: &str,
    issuer: String,
    expires_at: DateTime<Utc>,
    path: PathBuf,
    now: DateTime<Utc>,
) -> CertificateInfo {
    CertificateInfo {
        domain: domain.to_string(),
        issuer,
        expires_at,
        days_left: (expires_at - now).num_seconds().div_euclid(SECONDS_PER_DAY),
        is_valid: now < expires_at,
        path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration as ChronoDuration};
    use sitewarden_common::ScriptedRunner;
    use std::time::Duration;
    use tempfile::TempDir;

    fn manager(root: &Path, runner: Arc<ScriptedRunner>) -> CertManager {
        let config = TlsConfig {
            cert_root: root.to_path_buf(),
            ..TlsConfig::default()
        };
        CertManager::new(config, runner)
    }

    fn ymd(t: DateTime<Utc>) -> (i32, u8, u8) {
        (t.year(), t.month() as u8, t.day() as u8)
    }

    /// Write a self-signed certificate valid until the start of `not_after`'s day
    fn write_cert(root: &Path, domain: &str, not_after: DateTime<Utc>) {
        let mut params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, "Sitewarden Test CA");
        params.distinguished_name = dn;

        let (y, m, d) = ymd(not_after - ChronoDuration::days(60));
        params.not_before = rcgen::date_time_ymd(y, m, d);
        let (y, m, d) = ymd(not_after);
        params.not_after = rcgen::date_time_ymd(y, m, d);

        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();

        let dir = root.join(domain);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("cert.pem"), cert.pem()).unwrap();
        std::fs::write(dir.join("fullchain.pem"), cert.pem()).unwrap();
        std::fs::write(dir.join("privkey.pem"), key.serialize_pem()).unwrap();
    }

    #[test]
    fn test_check_expiry_ten_days_out() {
        let tmp = TempDir::new().unwrap();
        write_cert(tmp.path(), "a.test", Utc::now() + ChronoDuration::days(10));

        let certs = manager(tmp.path(), Arc::new(ScriptedRunner::new()));
        let info = certs.check_expiry("a.test").unwrap();

        assert!(info.days_left == 9 || info.days_left == 10, "days_left = {}", info.days_left);
        assert!(info.is_valid);
        assert!(info.is_usable());
        assert_eq!(info.issuer, "Sitewarden Test CA");
        assert_eq!(info.path, tmp.path().join("a.test"));
        assert!(certs.has_material("a.test"));
    }

    #[test]
    fn test_check_expiry_expired() {
        let tmp = TempDir::new().unwrap();
        write_cert(tmp.path(), "old.test", Utc::now() - ChronoDuration::days(3));

        let certs = manager(tmp.path(), Arc::new(ScriptedRunner::new()));
        let info = certs.check_expiry("old.test").unwrap();

        assert!(!info.is_valid);
        assert!(info.days_left < 0);
        assert!(!certs.is_usable("old.test"));
    }

    #[test]
    fn test_check_expiry_missing_material() {
        let tmp = TempDir::new().unwrap();
        let certs = manager(tmp.path(), Arc::new(ScriptedRunner::new()));

        assert!(certs.check_expiry("none.test").unwrap_err().is_not_found());
        assert!(!certs.has_material("none.test"));
    }

    #[test]
    fn test_check_expiry_garbage() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("bad.test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("cert.pem"), "not a certificate").unwrap();

        let certs = manager(tmp.path(), Arc::new(ScriptedRunner::new()));
        assert!(matches!(
            certs.check_expiry("bad.test").unwrap_err(),
            Error::Certificate(_)
        ));
    }

    #[test]
    fn test_days_left_floors() {
        let now = Utc::now();
        let info = certificate_info(
            "a.test",
            String::new(),
            now + ChronoDuration::hours(47),
            PathBuf::new(),
            now,
        );
        assert_eq!(info.days_left, 1);

        let info = certificate_info(
            "a.test",
            String::new(),
            now - ChronoDuration::hours(1),
            PathBuf::new(),
            now,
        );
        assert_eq!(info.days_left, -1);
        assert!(!info.is_valid);
    }

    #[test]
    fn test_list_certificates() {
        let tmp = TempDir::new().unwrap();
        write_cert(tmp.path(), "b.test", Utc::now() + ChronoDuration::days(30));
        write_cert(tmp.path(), "a.test", Utc::now() + ChronoDuration::days(60));
        std::fs::create_dir_all(tmp.path().join("empty.test")).unwrap();
        std::fs::write(tmp.path().join("README"), "certbot readme").unwrap();

        let certs = manager(tmp.path(), Arc::new(ScriptedRunner::new()));
        let domains: Vec<String> = certs
            .list_certificates()
            .unwrap()
            .into_iter()
            .map(|c| c.domain)
            .collect();
        assert_eq!(domains, vec!["a.test", "b.test"]);

        let missing = manager(&tmp.path().join("absent"), Arc::new(ScriptedRunner::new()));
        assert!(missing.list_certificates().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_obtain_command_line() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let certs = manager(tmp.path(), runner.clone());

        certs.obtain("a.test", None).await.unwrap();
        certs.obtain("b.test", Some("ops@b.test")).await.unwrap();

        let calls = runner.invocations();
        assert!(calls.contains(
            &"certbot --nginx -d a.test -d www.a.test --non-interactive --agree-tos --email admin@a.test --redirect"
                .to_string()
        ));
        assert!(calls.iter().any(|c| c.contains("--email ops@b.test")));
        assert_eq!(runner.count("apt-get"), 0);
    }

    #[tokio::test]
    async fn test_install_falls_back_to_dnf() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("which certbot", "");
        runner.fail("which apt-get", "");
        let certs = manager(tmp.path(), runner.clone());

        certs.ensure_tool().await.unwrap();
        assert_eq!(
            runner.count("dnf install -y certbot python3-certbot-nginx"),
            1
        );
    }

    #[tokio::test]
    async fn test_install_without_package_manager() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("which", "");
        let certs = manager(tmp.path(), runner.clone());

        let err = certs.obtain("a.test", None).await.unwrap_err();
        assert!(err.to_string().contains("unsupported package manager"));
        assert_eq!(runner.count("certbot --nginx"), 0);
    }

    #[tokio::test]
    async fn test_renew_commands() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let certs = manager(tmp.path(), runner.clone());

        certs.renew("a.test").await.unwrap();
        certs.renew_all().await.unwrap();

        assert_eq!(
            runner.invocations(),
            vec!["certbot renew --cert-name a.test --quiet", "certbot renew --quiet"]
        );
    }

    #[tokio::test]
    async fn test_revoke_then_delete() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let certs = manager(tmp.path(), runner.clone());

        certs.revoke("a.test").await.unwrap();
        assert_eq!(
            runner.invocations(),
            vec![
                "certbot revoke --cert-name a.test --non-interactive",
                "certbot delete --cert-name a.test --non-interactive"
            ]
        );
    }

    #[tokio::test]
    async fn test_revoked_but_not_deleted() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("certbot delete", "permission denied");
        let certs = manager(tmp.path(), runner);

        match certs.revoke("a.test").await.unwrap_err() {
            Error::RevokedNotDeleted { domain, diagnostic } => {
                assert_eq!(domain, "a.test");
                assert!(diagnostic.contains("permission denied"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_revoke_failure_skips_delete() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("certbot revoke", "no such certificate");
        let certs = manager(tmp.path(), runner.clone());

        assert!(matches!(
            certs.revoke("a.test").await.unwrap_err(),
            Error::ExternalTool { .. }
        ));
        assert_eq!(runner.count("certbot delete"), 0);
    }

    #[tokio::test]
    async fn test_concurrent_obtains_never_overlap() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(50)));
        let certs = Arc::new(manager(tmp.path(), runner.clone()));

        let a = {
            let certs = certs.clone();
            tokio::spawn(async move { certs.obtain("a.test", None).await })
        };
        let b = {
            let certs = certs.clone();
            tokio::spawn(async move { certs.obtain("b.test", None).await })
        };
        let c = {
            let certs = certs.clone();
            tokio::spawn(async move { certs.renew("c.test").await })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        c.await.unwrap().unwrap();

        assert_eq!(runner.count("certbot --nginx"), 2);
        assert_eq!(runner.max_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_invalid_domain_rejected_before_tool() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let certs = manager(tmp.path(), runner.clone());

        assert!(matches!(
            certs.obtain("../etc", None).await.unwrap_err(),
            Error::Validation(_)
        ));
        assert!(runner.invocations().is_empty());
    }
}
