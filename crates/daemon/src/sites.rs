//! Site lifecycle orchestration
//!
//! Sequences the registry, the renderer, the web server and the
//! certificate manager for create, update and delete. Operations on
//! different domains share no lock.
//!
//! Artifacts live at `{available}/{domain}.conf` and
//! `{available}/{domain}-ssl.conf`, each linked from the enabled directory
//! under the same name.

use serde::Serialize;
use sitewarden_common::{
    render, render_tls, parse_rendered, validate_domain, CertificateInfo, CommandRunner,
    CreateSiteRequest, Error, PartialFailure, RenderContext, RenderedFields, Result, Site,
    SiteReport, SiteState, SiteStatus, SiteType, SiteUpdate, Step, DEFAULT_LISTEN_PORT,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::certs::CertManager;
use crate::config::DaemonConfig;
use crate::dbprobe::DatabaseProbe;
use crate::nginx::{Nginx, WebServer};
use crate::state::SiteStore;

/// A registry site with its on-host annotations
#[derive(Debug, Clone, Serialize)]
pub struct SiteListing {
    #[serde(flatten)]
    pub site: Site,
    pub state: SiteState,
    pub directory_present: bool,
    pub has_database: bool,
    pub certificate: Option<CertificateInfo>,
}

/// Enabled vhost with no registry record
#[derive(Debug, Clone, Serialize)]
pub struct UnmanagedSite {
    pub domain: String,
    pub artifact: PathBuf,
    pub fields: RenderedFields,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub domain: String,
    /// Artifacts that were present and removed
    pub removed: Vec<PathBuf>,
    pub partial_failures: Vec<PartialFailure>,
}

/// An artifact written during one install, kept for rollback
struct Staged {
    available: PathBuf,
    enabled: PathBuf,
    previous: Option<String>,
    was_enabled: bool,
}

fn plain_artifact(domain: &str) -> String {
    format!("{}.conf", domain)
}

fn tls_artifact(domain: &str) -> String {
    format!("{}-ssl.conf", domain)
}

/// Every name a domain's artifacts may have, including legacy
/// extension-less ones
fn artifact_names(domain: &str) -> [String; 4] {
    [
        domain.to_string(),
        plain_artifact(domain),
        format!("{}-ssl", domain),
        tls_artifact(domain),
    ]
}

pub struct SiteManager {
    config: DaemonConfig,
    render_ctx: RenderContext,
    store: Arc<dyn SiteStore>,
    runner: Arc<dyn CommandRunner>,
    web_server: Arc<dyn WebServer>,
    certs: Arc<CertManager>,
    db_probe: Arc<DatabaseProbe>,
}

impl SiteManager {
    pub fn new(
        config: DaemonConfig,
        store: Arc<dyn SiteStore>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let web_server: Arc<dyn WebServer> =
            Arc::new(Nginx::new(config.web_server.clone(), runner.clone()));
        let certs = Arc::new(CertManager::new(config.tls.clone(), runner.clone()));
        let db_probe = Arc::new(DatabaseProbe::from_config(
            &config.database_probe,
            runner.clone(),
        ));

        Self {
            render_ctx: config.render_context(),
            config,
            store,
            runner,
            web_server,
            certs,
            db_probe,
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SiteStore> {
        &self.store
    }

    pub fn web_server(&self) -> &Arc<dyn WebServer> {
        &self.web_server
    }

    pub fn certs(&self) -> &Arc<CertManager> {
        &self.certs
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create a site, or re-create the artifacts of an existing one.
    ///
    /// Web-root creation is not undone when a later step fails. A failed
    /// config check removes the artifacts written by this call. Reload,
    /// permission and certificate failures are reported in the result and
    /// leave the site in place.
    pub async fn create(&self, request: &CreateSiteRequest) -> Result<SiteReport> {
        let mut site = self.site_from_request(request)?;
        if let Some(existing) = self.store.find(&site.domain)? {
            site.tls_enabled = existing.tls_enabled;
        }

        info!("Creating site {} ({})", site.domain, site.site_type);
        let mut failures = Vec::new();

        self.prepare_web_root(&site, &mut failures).await?;

        let mut artifacts = vec![(plain_artifact(&site.domain), render(&site, &self.render_ctx))];
        if site.tls_enabled && self.certs.has_material(&site.domain) {
            // the plain render drops any listener certbot added in place
            artifacts.push((tls_artifact(&site.domain), render_tls(&site, &self.render_ctx)));
        }
        let changed = self.install_artifacts(&artifacts).await?;

        self.reload_best_effort(&mut failures).await;

        if request.tls {
            match self.certs.obtain(&site.domain, request.email.as_deref()).await {
                Ok(()) => site.tls_enabled = true,
                Err(e) => {
                    warn!("TLS for {} not enabled: {}", site.domain, e);
                    failures.push(PartialFailure::new(Step::Tls, e.to_string()));
                }
            }
        }

        let mut stored = self.store.upsert(&site)?;

        if !is_dir(&stored.web_root).await {
            self.store.set_status(&stored.domain, SiteStatus::NoDirectory)?;
            stored.status = Some(SiteStatus::NoDirectory);
        }

        info!(
            "Site {} created ({} partial failures)",
            stored.domain,
            failures.len()
        );
        Ok(SiteReport {
            site: stored,
            config_changed: changed,
            partial_failures: failures,
        })
    }

    /// Change a site's fields and bring its artifacts in line.
    ///
    /// Re-applying an update that is already in effect writes nothing and
    /// does not reload.
    pub async fn update(&self, domain: &str, changes: &SiteUpdate) -> Result<SiteReport> {
        validate_domain(domain)?;
        let current = self.store.get(domain)?;
        let mut site = current.clone();
        changes.apply_to(&mut site)?;

        let mut artifacts = vec![(plain_artifact(domain), render(&site, &self.render_ctx))];
        if site.tls_enabled && self.certs.has_material(domain) {
            artifacts.push((tls_artifact(domain), render_tls(&site, &self.render_ctx)));
        }

        let changed = self.install_artifacts(&artifacts).await?;

        let mut failures = Vec::new();
        if changed {
            info!("Updated configuration for {}", domain);
            self.reload_best_effort(&mut failures).await;
        } else {
            debug!("Configuration for {} already up to date", domain);
        }

        let stored = if site != current {
            self.store.upsert(&site)?
        } else {
            current
        };

        Ok(SiteReport {
            site: stored,
            config_changed: changed,
            partial_failures: failures,
        })
    }

    /// Remove a site's artifacts and registry record.
    ///
    /// The web root and certificate material are never touched.
    pub async fn delete(&self, domain: &str) -> Result<DeleteReport> {
        validate_domain(domain)?;
        let registered = self.store.find(domain)?.is_some();

        let mut removed = Vec::new();
        for dir in [self.config.available_path(), self.config.enabled_path()] {
            for name in artifact_names(domain) {
                let path = dir.join(name);
                if remove_if_present(&path).await? {
                    removed.push(path);
                }
            }
        }

        if !registered && removed.is_empty() {
            return Err(Error::not_found("site", domain));
        }

        let mut failures = Vec::new();
        self.reload_best_effort(&mut failures).await;

        if registered {
            self.store.delete(domain)?;
        }

        info!("Deleted site {} ({} artifacts removed)", domain, removed.len());
        Ok(DeleteReport {
            domain: domain.to_string(),
            removed,
            partial_failures: failures,
        })
    }

    pub fn get(&self, domain: &str) -> Result<Site> {
        self.store.get(domain)
    }

    /// Registered sites, featured first, with on-host annotations
    pub async fn list(&self) -> Result<Vec<SiteListing>> {
        let sites = self.store.list()?;
        let listings =
            futures::future::join_all(sites.into_iter().map(|site| self.annotate(site))).await;
        Ok(listings)
    }

    async fn annotate(&self, site: Site) -> SiteListing {
        let directory_present = is_dir(&site.web_root).await;
        let has_database = self.db_probe.site_has_database(&site.domain).await;
        let certificate = self.certs.check_expiry(&site.domain).ok();
        let state = if directory_present {
            site.state()
        } else {
            SiteState::NoDirectory
        };

        SiteListing {
            site,
            state,
            directory_present,
            has_database,
            certificate,
        }
    }

    /// Enabled vhosts the registry does not know about
    pub async fn discover_unmanaged(&self) -> Result<Vec<UnmanagedSite>> {
        let enabled = self.config.enabled_path();
        let mut entries = match tokio::fs::read_dir(&enabled).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "default" || name.ends_with("-ssl") || name.ends_with("-ssl.conf") {
                continue;
            }

            let path = entry.path();
            if !tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
                continue;
            }

            let domain = name.strip_suffix(".conf").unwrap_or(&name).to_string();
            if self.store.find(&domain)?.is_some() {
                continue;
            }

            match tokio::fs::read_to_string(&path).await {
                Ok(text) => found.push(UnmanagedSite {
                    domain,
                    fields: parse_rendered(&text),
                    artifact: path,
                }),
                Err(e) => debug!("Skipping unreadable {:?}: {}", path, e),
            }
        }

        found.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(found)
    }

    // ========================================================================
    // TLS
    // ========================================================================

    /// Serve a site over TLS using the certificate already on disk
    pub async fn enable_tls(&self, domain: &str) -> Result<SiteReport> {
        validate_domain(domain)?;
        let current = self.store.get(domain)?;
        if !self.certs.has_material(domain) {
            return Err(Error::not_found("certificate", domain));
        }

        let mut site = current.clone();
        site.tls_enabled = true;

        let changed = self
            .install_artifacts(&[(tls_artifact(domain), render_tls(&site, &self.render_ctx))])
            .await?;

        let mut failures = Vec::new();
        if changed {
            self.reload_best_effort(&mut failures).await;
        }

        let stored = if site != current {
            self.store.upsert(&site)?
        } else {
            current
        };

        info!("TLS enabled for {}", domain);
        Ok(SiteReport {
            site: stored,
            config_changed: changed,
            partial_failures: failures,
        })
    }

    /// Drop the TLS variant and restore the plain vhost
    pub async fn disable_tls(&self, domain: &str) -> Result<SiteReport> {
        validate_domain(domain)?;
        let current = self.store.get(domain)?;

        let mut removed = false;
        for dir in [self.config.available_path(), self.config.enabled_path()] {
            for name in [format!("{}-ssl", domain), tls_artifact(domain)] {
                removed |= remove_if_present(&dir.join(name)).await?;
            }
        }

        let mut site = current.clone();
        site.tls_enabled = false;

        // certbot may have rewritten the plain vhost in place
        let rewritten = self
            .install_artifacts(&[(plain_artifact(domain), render(&site, &self.render_ctx))])
            .await?;

        let changed = removed || rewritten;
        let mut failures = Vec::new();
        if changed {
            self.reload_best_effort(&mut failures).await;
        }

        let stored = if site != current {
            self.store.upsert(&site)?
        } else {
            current
        };

        info!("TLS disabled for {}", domain);
        Ok(SiteReport {
            site: stored,
            config_changed: changed,
            partial_failures: failures,
        })
    }

    /// Obtain a certificate for a registered site and mark it TLS-enabled
    pub async fn issue_certificate(&self, domain: &str, email: Option<&str>) -> Result<SiteReport> {
        validate_domain(domain)?;
        let mut site = self.store.get(domain)?;

        self.certs.obtain(domain, email).await?;

        site.tls_enabled = true;
        let stored = self.store.upsert(&site)?;
        Ok(SiteReport {
            site: stored,
            config_changed: true,
            partial_failures: Vec::new(),
        })
    }

    /// Stop serving TLS for a site, then revoke and delete its certificate
    pub async fn revoke_certificate(&self, domain: &str) -> Result<()> {
        validate_domain(domain)?;
        if self.store.find(domain)?.is_some() {
            let report = self.disable_tls(domain).await?;
            for failure in report.partial_failures {
                warn!("{} while disabling TLS for {}: {}", failure.step, domain, failure.message);
            }
        }
        self.certs.revoke(domain).await
    }

    // ========================================================================
    // Steps
    // ========================================================================

    fn site_from_request(&self, request: &CreateSiteRequest) -> Result<Site> {
        let domain = request.domain.trim().to_string();
        validate_domain(&domain)?;

        let web_root = request
            .web_root
            .clone()
            .unwrap_or_else(|| self.config.default_web_root(&domain));
        if !web_root.is_absolute() {
            return Err(Error::Validation(format!(
                "web_root must be absolute: {}",
                web_root.display()
            )));
        }

        let backend_port = request
            .backend_port
            .filter(|port| *port > 0)
            .unwrap_or_else(|| SiteType::default_backend_port(&request.site_type));

        let php_runtime_version = request
            .php_runtime_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let site = Site {
            site_type: SiteType::from_label(&request.site_type),
            web_root,
            listen_port: request.listen_port.unwrap_or(DEFAULT_LISTEN_PORT),
            backend_port,
            php_runtime_version,
            tls_enabled: false,
            featured: request.featured,
            status: None,
            status_code: 0,
            last_checked_at: None,
            created_at: 0,
            updated_at: 0,
            domain,
        };
        site.validate()?;
        Ok(site)
    }

    async fn prepare_web_root(&self, site: &Site, failures: &mut Vec<PartialFailure>) -> Result<()> {
        let root = &site.web_root;
        tokio::fs::create_dir_all(root).await?;

        if dir_is_empty(root).await? {
            let docroot = site
                .site_type
                .document_root(root)
                .unwrap_or_else(|| root.clone());
            tokio::fs::create_dir_all(&docroot).await?;
            tokio::fs::write(docroot.join("index.html"), landing_page(site)).await?;
            debug!("Wrote landing page for {} into {:?}", site.domain, docroot);
        }

        let owner = &self.config.sites.owner;
        if !owner.is_empty() {
            let ownership = format!("{}:{}", owner, owner);
            let root_arg = root.to_string_lossy();
            let chown = self
                .runner
                .run("chown", &["-R", &ownership, &root_arg])
                .await
                .and_then(|out| out.into_result("chown"));
            if let Err(e) = chown {
                warn!("Could not hand {:?} to {}: {}", root, owner, e);
                failures.push(PartialFailure::new(Step::Permissions, e.to_string()));
            }
        }

        Ok(())
    }

    /// Write artifacts to the available directory, enable them and check
    /// the resulting configuration. Returns false when every artifact was
    /// already in place.
    ///
    /// On a failed check every artifact written here is restored to its
    /// previous text, or removed if it did not exist before.
    async fn install_artifacts(&self, artifacts: &[(String, String)]) -> Result<bool> {
        let available_dir = self.config.available_path();
        let enabled_dir = self.config.enabled_path();
        tokio::fs::create_dir_all(&available_dir).await?;
        tokio::fs::create_dir_all(&enabled_dir).await?;

        let mut staged = Vec::new();
        for (name, text) in artifacts {
            let available = available_dir.join(name);
            let enabled = enabled_dir.join(name);

            if let Err(e) = self.stage(available, enabled, text, &mut staged).await {
                roll_back(&staged).await;
                return Err(e);
            }
        }

        if staged.is_empty() {
            return Ok(false);
        }

        if let Err(e) = self.web_server.validate().await {
            warn!("Configuration rejected, rolling back {} artifact(s)", staged.len());
            roll_back(&staged).await;
            return Err(e);
        }

        Ok(true)
    }

    async fn stage(
        &self,
        available: PathBuf,
        enabled: PathBuf,
        text: &str,
        staged: &mut Vec<Staged>,
    ) -> Result<()> {
        let previous = read_optional(&available).await?;
        if previous.as_deref() == Some(text) && is_enabled_as(&enabled, &available, text).await {
            return Ok(());
        }

        let was_enabled = tokio::fs::symlink_metadata(&enabled).await.is_ok();
        staged.push(Staged {
            available: available.clone(),
            enabled: enabled.clone(),
            previous,
            was_enabled,
        });

        tokio::fs::write(&available, text).await?;
        enable(&available, &enabled).await?;
        debug!("Wrote {:?}", available);
        Ok(())
    }

    async fn reload_best_effort(&self, failures: &mut Vec<PartialFailure>) {
        if let Err(e) = self.web_server.reload().await {
            warn!("Web server reload failed: {}", e);
            failures.push(PartialFailure::new(Step::Reload, e.to_string()));
        }
    }
}

async fn roll_back(staged: &[Staged]) {
    for artifact in staged.iter().rev() {
        let result = match &artifact.previous {
            Some(text) => restore(artifact, text).await,
            None => remove_if_present(&artifact.available)
                .await
                .and(remove_if_present(&artifact.enabled).await)
                .map(|_| ()),
        };
        if let Err(e) = result {
            warn!("Rollback of {:?} incomplete: {}", artifact.available, e);
        }
    }
}

async fn restore(artifact: &Staged, text: &str) -> Result<()> {
    tokio::fs::write(&artifact.available, text).await?;
    if artifact.was_enabled {
        enable(&artifact.available, &artifact.enabled).await
    } else {
        remove_if_present(&artifact.enabled).await.map(|_| ())
    }
}

/// Point `enabled` at `available`: a symlink where supported, a copy
/// otherwise
async fn enable(available: &Path, enabled: &Path) -> Result<()> {
    remove_if_present(enabled).await?;
    #[cfg(unix)]
    tokio::fs::symlink(available, enabled).await?;
    #[cfg(not(unix))]
    tokio::fs::copy(available, enabled).await.map(|_| ())?;
    Ok(())
}

async fn is_enabled_as(enabled: &Path, available: &Path, text: &str) -> bool {
    match tokio::fs::symlink_metadata(enabled).await {
        Ok(meta) if meta.file_type().is_symlink() => tokio::fs::read_link(enabled)
            .await
            .map(|target| target == available)
            .unwrap_or(false),
        Ok(_) => tokio::fs::read_to_string(enabled)
            .await
            .map(|copy| copy == text)
            .unwrap_or(false),
        Err(_) => false,
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Remove a file or link; false if there was nothing to remove
async fn remove_if_present(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn dir_is_empty(path: &Path) -> Result<bool> {
    let mut entries = tokio::fs::read_dir(path).await?;
    Ok(entries.next_entry().await?.is_none())
}

fn landing_page(site: &Site) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Welcome to {domain}</title>
</head>
<body>
    <h1>{domain}</h1>
    <p>This site is ready ({site_type}).</p>
</body>
</html>
"#,
        domain = site.domain,
        site_type = site.site_type
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemorySiteStore;
    use sitewarden_common::ScriptedRunner;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        config: DaemonConfig,
        runner: Arc<ScriptedRunner>,
        store: Arc<MemorySiteStore>,
        manager: SiteManager,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let config = DaemonConfig::rooted_at(tmp.path());
        let runner = Arc::new(ScriptedRunner::dry_run());
        let store = Arc::new(MemorySiteStore::new());
        let manager = SiteManager::new(config.clone(), store.clone(), runner.clone());
        Fixture {
            _tmp: tmp,
            config,
            runner,
            store,
            manager,
        }
    }

    fn request(domain: &str, site_type: &str) -> CreateSiteRequest {
        CreateSiteRequest {
            domain: domain.to_string(),
            site_type: site_type.to_string(),
            ..CreateSiteRequest::default()
        }
    }

    #[tokio::test]
    async fn test_create_defaults() {
        let f = fixture();
        let report = f.manager.create(&request("shop.test", "laravel")).await.unwrap();

        assert!(report.is_clean());
        assert!(report.config_changed);
        let site = report.site;
        assert_eq!(site.site_type, SiteType::FrameworkPhp);
        assert_eq!(site.listen_port, 80);
        assert_eq!(site.web_root, f.config.default_web_root("shop.test"));
        assert_eq!(site.state(), SiteState::Provisioning);

        let landing = site.web_root.join("public").join("index.html");
        assert!(std::fs::read_to_string(landing).unwrap().contains("shop.test"));
    }

    #[tokio::test]
    async fn test_create_keeps_existing_content() {
        let f = fixture();
        let root = f.config.default_web_root("blog.test");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("index.php"), "<?php echo 'mine';").unwrap();

        f.manager.create(&request("blog.test", "php")).await.unwrap();

        assert!(!root.join("index.html").exists());
        assert_eq!(
            std::fs::read_to_string(root.join("index.php")).unwrap(),
            "<?php echo 'mine';"
        );
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input_before_side_effects() {
        let f = fixture();
        let err = f.manager.create(&request("Bad Domain", "php")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let mut relative = request("ok.test", "php");
        relative.web_root = Some(PathBuf::from("www/ok"));
        assert!(matches!(
            f.manager.create(&relative).await.unwrap_err(),
            Error::Validation(_)
        ));

        assert!(f.runner.invocations().is_empty());
        assert!(!f.config.available_path().exists());
    }

    #[tokio::test]
    async fn test_permission_fixup_is_soft() {
        let tmp = TempDir::new().unwrap();
        let mut config = DaemonConfig::rooted_at(tmp.path());
        config.sites.owner = "www-data".to_string();
        let runner = Arc::new(ScriptedRunner::dry_run());
        runner.fail("chown", "chown: invalid user: 'www-data:www-data'");
        let manager = SiteManager::new(config, Arc::new(MemorySiteStore::new()), runner.clone());

        let report = manager.create(&request("own.test", "php")).await.unwrap();

        assert_eq!(report.partial_failures.len(), 1);
        assert_eq!(report.partial_failures[0].step, Step::Permissions);
        assert_eq!(runner.count("chown -R www-data:www-data"), 1);
    }

    #[tokio::test]
    async fn test_reload_failure_is_soft() {
        let f = fixture();
        f.runner.fail("systemctl reload", "nginx.service is not active");

        let report = f.manager.create(&request("a.test", "php")).await.unwrap();

        assert_eq!(report.partial_failures[0].step, Step::Reload);
        assert!(f.config.available_path().join("a.test.conf").exists());
        assert!(f.store.find("a.test").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_rollback_restores_previous_artifact() {
        let f = fixture();
        f.manager.create(&request("api.test", "nodejs")).await.unwrap();
        let artifact = f.config.available_path().join("api.test.conf");
        let before = std::fs::read_to_string(&artifact).unwrap();

        f.runner.fail("nginx -t", "nginx: [emerg] bind() failed");
        let changes = SiteUpdate {
            backend_port: Some(4000),
            ..SiteUpdate::default()
        };
        assert!(f.manager.update("api.test", &changes).await.is_err());

        assert_eq!(std::fs::read_to_string(&artifact).unwrap(), before);
        assert!(f.config.enabled_path().join("api.test.conf").exists());
        assert_eq!(f.store.get("api.test").unwrap().backend_port, 3000);
    }

    #[tokio::test]
    async fn test_update_unknown_site() {
        let f = fixture();
        let err = f
            .manager
            .update("ghost.test", &SiteUpdate::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_enable_tls_requires_material() {
        let f = fixture();
        f.manager.create(&request("a.test", "php")).await.unwrap();

        let err = f.manager.enable_tls("a.test").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!f.config.available_path().join("a.test-ssl.conf").exists());
    }

    #[tokio::test]
    async fn test_enable_and_disable_tls() {
        let f = fixture();
        f.manager.create(&request("a.test", "php")).await.unwrap();

        let certs = f.config.tls.cert_root.join("a.test");
        std::fs::create_dir_all(&certs).unwrap();
        std::fs::write(certs.join("fullchain.pem"), "chain").unwrap();
        std::fs::write(certs.join("privkey.pem"), "key").unwrap();

        let report = f.manager.enable_tls("a.test").await.unwrap();
        assert!(report.site.tls_enabled);
        let tls = f.config.available_path().join("a.test-ssl.conf");
        let text = std::fs::read_to_string(&tls).unwrap();
        assert!(text.contains("listen 443 ssl"));
        assert!(text.contains(&certs.join("fullchain.pem").display().to_string()));
        assert!(f.config.enabled_path().join("a.test-ssl.conf").exists());

        let report = f.manager.disable_tls("a.test").await.unwrap();
        assert!(!report.site.tls_enabled);
        assert!(report.config_changed);
        assert!(!tls.exists());
        assert!(!f.config.enabled_path().join("a.test-ssl.conf").exists());
        assert!(certs.join("privkey.pem").exists());
    }

    #[tokio::test]
    async fn test_delete_unknown_domain() {
        let f = fixture();
        assert!(f.manager.delete("ghost.test").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_removes_legacy_names() {
        let f = fixture();
        std::fs::create_dir_all(f.config.available_path()).unwrap();
        std::fs::create_dir_all(f.config.enabled_path()).unwrap();
        std::fs::write(f.config.available_path().join("old.test"), "server {}").unwrap();
        std::fs::write(f.config.enabled_path().join("old.test-ssl"), "server {}").unwrap();

        let report = f.manager.delete("old.test").await.unwrap();
        assert_eq!(report.removed.len(), 2);
    }

    #[tokio::test]
    async fn test_list_annotations() {
        let f = fixture();
        f.manager.create(&request("b.test", "php")).await.unwrap();
        let mut featured = request("a.test", "python");
        featured.featured = true;
        let report = f.manager.create(&featured).await.unwrap();
        std::fs::remove_dir_all(&report.site.web_root).unwrap();
        f.runner.succeed("mysql", "b_test\n");

        let listings = f.manager.list().await.unwrap();
        let domains: Vec<&str> = listings.iter().map(|l| l.site.domain.as_str()).collect();
        assert_eq!(domains, vec!["a.test", "b.test"]);

        let a = &listings[0];
        assert!(!a.directory_present);
        assert_eq!(a.state, SiteState::NoDirectory);
        assert!(!a.has_database);
        assert!(a.certificate.is_none());

        let b = &listings[1];
        assert!(b.directory_present);
        assert!(b.has_database);
        assert_eq!(b.state, SiteState::Provisioning);
    }

    #[tokio::test]
    async fn test_discover_unmanaged() {
        let f = fixture();
        f.manager.create(&request("managed.test", "php")).await.unwrap();

        let enabled = f.config.enabled_path();
        std::fs::write(
            enabled.join("legacy.test.conf"),
            "server {\n    listen 8080;\n    server_name legacy.test;\n    location / {\n        proxy_pass http://127.0.0.1:5000;\n    }\n}\n",
        )
        .unwrap();
        std::fs::write(enabled.join("legacy.test-ssl.conf"), "server {}").unwrap();
        std::fs::write(enabled.join("default"), "server {}").unwrap();

        let found = f.manager.discover_unmanaged().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].domain, "legacy.test");
        assert_eq!(found[0].fields.listen_port, Some(8080));
        assert_eq!(found[0].fields.backend_port, Some(5000));
        assert_eq!(found[0].fields.site_type, Some(SiteType::ReverseProxy));
    }

    #[tokio::test]
    async fn test_revoke_certificate_drops_tls_first() {
        let f = fixture();
        f.manager.create(&request("a.test", "php")).await.unwrap();
        let certs = f.config.tls.cert_root.join("a.test");
        std::fs::create_dir_all(&certs).unwrap();
        std::fs::write(certs.join("fullchain.pem"), "chain").unwrap();
        std::fs::write(certs.join("privkey.pem"), "key").unwrap();
        f.manager.enable_tls("a.test").await.unwrap();

        f.manager.revoke_certificate("a.test").await.unwrap();

        assert!(!f.store.get("a.test").unwrap().tls_enabled);
        assert!(!f.config.available_path().join("a.test-ssl.conf").exists());
        assert_eq!(f.runner.count("certbot revoke --cert-name a.test"), 1);
        assert_eq!(f.runner.count("certbot delete --cert-name a.test"), 1);
    }
}
