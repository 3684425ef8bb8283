//! Site registry
//!
//! Components never share the registry's internals; they receive a
//! [`SiteStore`] and the store owns its own locking. Updates are per-record
//! and last-write-wins.

use parking_lot::RwLock;
use sitewarden_common::{Database, Error, ProbeOutcome, Result, Site, SiteStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::DaemonConfig;

/// Persisted store of site records keyed by domain
pub trait SiteStore: Send + Sync {
    fn find(&self, domain: &str) -> Result<Option<Site>>;

    /// All sites, featured first, then by domain
    fn list(&self) -> Result<Vec<Site>>;

    /// Insert a new domain or update an existing record's configuration
    /// fields, keeping its probe fields. Returns the stored record.
    fn upsert(&self, site: &Site) -> Result<Site>;

    /// Returns false if the domain was not registered
    fn delete(&self, domain: &str) -> Result<bool>;

    /// Write a probe result (`status`, `status_code`, `last_checked_at`)
    fn record_probe(&self, domain: &str, outcome: &ProbeOutcome) -> Result<()>;

    /// Write the status alone, for the creation-time directory check
    fn set_status(&self, domain: &str, status: SiteStatus) -> Result<()>;

    /// Find a site or fail with `NotFound`
    fn get(&self, domain: &str) -> Result<Site> {
        self.find(domain)?
            .ok_or_else(|| Error::not_found("site", domain))
    }
}

impl SiteStore for Database {
    fn find(&self, domain: &str) -> Result<Option<Site>> {
        self.get_site(domain)
    }

    fn list(&self) -> Result<Vec<Site>> {
        self.list_sites()
    }

    fn upsert(&self, site: &Site) -> Result<Site> {
        self.upsert_site(site)
    }

    fn delete(&self, domain: &str) -> Result<bool> {
        self.delete_site(domain)
    }

    fn record_probe(&self, domain: &str, outcome: &ProbeOutcome) -> Result<()> {
        if self.record_probe(domain, outcome)? {
            Ok(())
        } else {
            Err(Error::not_found("site", domain))
        }
    }

    fn set_status(&self, domain: &str, status: SiteStatus) -> Result<()> {
        if self.set_site_status(domain, status)? {
            Ok(())
        } else {
            Err(Error::not_found("site", domain))
        }
    }
}

/// Open the SQLite registry configured for this host
pub fn open_store(config: &DaemonConfig) -> Result<Arc<dyn SiteStore>> {
    std::fs::create_dir_all(&config.store_path)?;
    let db = Database::open(config.db_path())?;
    info!("Site registry at {:?}", config.db_path());
    Ok(Arc::new(db))
}

/// In-memory registry
#[derive(Debug, Default)]
pub struct MemorySiteStore {
    sites: RwLock<HashMap<String, Site>>,
}

impl MemorySiteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SiteStore for MemorySiteStore {
    fn find(&self, domain: &str) -> Result<Option<Site>> {
        Ok(self.sites.read().get(domain).cloned())
    }

    fn list(&self) -> Result<Vec<Site>> {
        let mut sites: Vec<Site> = self.sites.read().values().cloned().collect();
        sites.sort_by(|a, b| b.featured.cmp(&a.featured).then_with(|| a.domain.cmp(&b.domain)));
        Ok(sites)
    }

    fn upsert(&self, site: &Site) -> Result<Site> {
        let now = chrono::Utc::now().timestamp();
        let mut sites = self.sites.write();

        let stored = match sites.get(&site.domain) {
            Some(existing) => Site {
                status: existing.status,
                status_code: existing.status_code,
                last_checked_at: existing.last_checked_at,
                created_at: existing.created_at,
                updated_at: now,
                ..site.clone()
            },
            None => Site {
                created_at: now,
                updated_at: now,
                ..site.clone()
            },
        };

        sites.insert(site.domain.clone(), stored.clone());
        Ok(stored)
    }

    fn delete(&self, domain: &str) -> Result<bool> {
        Ok(self.sites.write().remove(domain).is_some())
    }

    fn record_probe(&self, domain: &str, outcome: &ProbeOutcome) -> Result<()> {
        let mut sites = self.sites.write();
        let site = sites
            .get_mut(domain)
            .ok_or_else(|| Error::not_found("site", domain))?;
        site.status = Some(outcome.status);
        site.status_code = outcome.status_code;
        site.last_checked_at = Some(outcome.checked_at);
        Ok(())
    }

    fn set_status(&self, domain: &str, status: SiteStatus) -> Result<()> {
        let mut sites = self.sites.write();
        let site = sites
            .get_mut(domain)
            .ok_or_else(|| Error::not_found("site", domain))?;
        site.status = Some(status);
        Ok(())
    }
}
