//! Reachability monitor
//!
//! Periodically probes every registered site over HTTP and writes the
//! result back to the registry. Readers see the outcome of the last
//! completed pass, never a live value.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sitewarden_common::{Error, ProbeOutcome, Result, Site, SiteStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::state::SiteStore;

/// Issues one liveness request
#[async_trait]
pub trait Prober: Send + Sync {
    /// Status code of whatever response came back. Only transport
    /// failures are errors.
    async fn probe(&self, url: &str) -> Result<u16>;
}

/// reqwest-backed prober.
///
/// Certificate verification is off: this answers "does it respond", not
/// "is it trustworthy".
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .danger_accept_invalid_certs(true)
            .user_agent(concat!("sitewarden-monitor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> Result<u16> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(format!("{}: {}", url, e)))?;
        Ok(response.status().as_u16())
    }
}

/// Probe a site on its primary scheme, retrying once on the other one
pub async fn probe_site(prober: &dyn Prober, site: &Site) -> ProbeOutcome {
    let primary = site.primary_scheme();
    let fallback = if primary == "https" { "http" } else { "https" };

    for scheme in [primary, fallback] {
        let url = format!("{}://{}", scheme, site.domain);
        match prober.probe(&url).await {
            Ok(code) => {
                debug!("{} answered {}", url, code);
                return ProbeOutcome::reachable(code, Utc::now());
            }
            Err(e) => debug!("{} unreachable: {}", url, e),
        }
    }

    ProbeOutcome::unreachable(Utc::now())
}

/// Summary of one monitor pass
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub probed: usize,
    pub active: usize,
    pub errors: usize,
    /// Domains whose record could not be written, with the reason
    pub update_failures: Vec<(String, String)>,
}

pub struct ReachabilityMonitor {
    store: Arc<dyn SiteStore>,
    prober: Arc<dyn Prober>,
    interval: Duration,
}

impl ReachabilityMonitor {
    pub fn new(store: Arc<dyn SiteStore>, prober: Arc<dyn Prober>, config: &MonitorConfig) -> Self {
        Self {
            store,
            prober,
            interval: config.interval(),
        }
    }

    /// Run a pass now and then once per interval, forever
    pub async fn run(&self) {
        info!("Reachability monitor started (every {:?})", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_pass().await {
                error!("Monitor pass failed: {}", e);
            }
        }
    }

    /// Probe every registered site concurrently and wait for all of them
    pub async fn run_pass(&self) -> Result<PassReport> {
        let started_at = Utc::now();
        let sites = self.store.list()?;

        let mut probes = JoinSet::new();
        for site in sites {
            let store = self.store.clone();
            let prober = self.prober.clone();
            probes.spawn(async move {
                let outcome = probe_site(prober.as_ref(), &site).await;
                let written = store.record_probe(&site.domain, &outcome);
                (site.domain, outcome, written)
            });
        }

        let mut report = PassReport {
            started_at,
            probed: 0,
            active: 0,
            errors: 0,
            update_failures: Vec::new(),
        };

        while let Some(joined) = probes.join_next().await {
            let (domain, outcome, written) = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!("Probe task failed: {}", e);
                    continue;
                }
            };

            report.probed += 1;
            match outcome.status {
                SiteStatus::Active => report.active += 1,
                _ => report.errors += 1,
            }
            if let Err(e) = written {
                warn!("Failed to record probe for {}: {}", domain, e);
                report.update_failures.push((domain, e.to_string()));
            }
        }

        info!(
            "Monitor pass: {} probed, {} active, {} error, {} update failures",
            report.probed,
            report.active,
            report.errors,
            report.update_failures.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemorySiteStore;
    use parking_lot::Mutex;
    use sitewarden_common::SiteType;
    use std::collections::HashMap;
    use std::path::PathBuf;

    /// Answers from a fixed table; unknown URLs fail like a refused connection
    #[derive(Default)]
    struct TableProber {
        answers: HashMap<String, u16>,
        calls: Mutex<Vec<String>>,
    }

    impl TableProber {
        fn answer(mut self, url: &str, code: u16) -> Self {
            self.answers.insert(url.to_string(), code);
            self
        }
    }

    #[async_trait]
    impl Prober for TableProber {
        async fn probe(&self, url: &str) -> Result<u16> {
            self.calls.lock().push(url.to_string());
            self.answers
                .get(url)
                .copied()
                .ok_or_else(|| Error::Http(format!("{}: connection refused", url)))
        }
    }

    /// Memory store that refuses probe writes for one domain
    struct StubbornStore {
        inner: MemorySiteStore,
        refuse: String,
    }

    impl SiteStore for StubbornStore {
        fn find(&self, domain: &str) -> Result<Option<Site>> {
            self.inner.find(domain)
        }
        fn list(&self) -> Result<Vec<Site>> {
            self.inner.list()
        }
        fn upsert(&self, site: &Site) -> Result<Site> {
            self.inner.upsert(site)
        }
        fn delete(&self, domain: &str) -> Result<bool> {
            self.inner.delete(domain)
        }
        fn record_probe(&self, domain: &str, outcome: &ProbeOutcome) -> Result<()> {
            if domain == self.refuse {
                return Err(Error::Internal("database is locked".to_string()));
            }
            self.inner.record_probe(domain, outcome)
        }
        fn set_status(&self, domain: &str, status: SiteStatus) -> Result<()> {
            self.inner.set_status(domain, status)
        }
    }

    fn site(domain: &str, tls_enabled: bool) -> Site {
        Site {
            domain: domain.to_string(),
            site_type: SiteType::ReverseProxy,
            web_root: PathBuf::from("/home").join(domain),
            listen_port: 80,
            backend_port: 3000,
            php_runtime_version: None,
            tls_enabled,
            featured: false,
            status: None,
            status_code: 0,
            last_checked_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn monitor(store: Arc<dyn SiteStore>, prober: Arc<dyn Prober>) -> ReachabilityMonitor {
        ReachabilityMonitor::new(store, prober, &MonitorConfig::default())
    }

    #[tokio::test]
    async fn test_any_response_is_active() {
        let prober = TableProber::default().answer("http://missing.test", 404);
        let outcome = probe_site(&prober, &site("missing.test", false)).await;
        assert_eq!(outcome.status, SiteStatus::Active);
        assert_eq!(outcome.status_code, 404);
    }

    #[tokio::test]
    async fn test_falls_back_to_other_scheme_once() {
        let prober = TableProber::default().answer("http://tls.test", 301);
        let outcome = probe_site(&prober, &site("tls.test", true)).await;
        assert_eq!(outcome.status_code, 301);
        assert_eq!(
            *prober.calls.lock(),
            vec!["https://tls.test".to_string(), "http://tls.test".to_string()]
        );

        let prober = TableProber::default();
        let outcome = probe_site(&prober, &site("down.test", false)).await;
        assert_eq!(outcome.status, SiteStatus::Error);
        assert_eq!(outcome.status_code, 0);
        assert_eq!(prober.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_pass_updates_every_site() {
        let store = Arc::new(MemorySiteStore::new());
        for i in 0..8 {
            store.upsert(&site(&format!("s{}.test", i), i % 2 == 0)).unwrap();
        }
        let prober = TableProber::default()
            .answer("https://s0.test", 200)
            .answer("http://s1.test", 500)
            .answer("http://s2.test", 200);

        let report = monitor(store.clone(), Arc::new(prober)).run_pass().await.unwrap();

        assert_eq!(report.probed, 8);
        assert_eq!(report.active, 3);
        assert_eq!(report.errors, 5);
        assert!(report.update_failures.is_empty());

        for s in store.list().unwrap() {
            let checked = s.last_checked_at.expect("probed");
            assert!(checked >= report.started_at, "{} checked before pass start", s.domain);
        }
        assert_eq!(store.get("s1.test").unwrap().status_code, 500);
        assert_eq!(store.get("s2.test").unwrap().status, Some(SiteStatus::Active));
        assert_eq!(store.get("s3.test").unwrap().status, Some(SiteStatus::Error));
    }

    #[tokio::test]
    async fn test_sqlite_results_not_older_than_pass() {
        let db = sitewarden_common::Database::open_memory().unwrap();
        for domain in ["one.test", "two.test", "three.test"] {
            db.upsert_site(&site(domain, false)).unwrap();
        }
        let store: Arc<dyn SiteStore> = Arc::new(db);

        let report = monitor(store.clone(), Arc::new(TableProber::default()))
            .run_pass()
            .await
            .unwrap();

        assert_eq!(report.errors, 3);
        for s in store.list().unwrap() {
            let checked = s.last_checked_at.expect("probed");
            assert!(
                checked >= report.started_at,
                "{}: {} before {}",
                s.domain,
                checked,
                report.started_at
            );
        }
    }

    #[tokio::test]
    async fn test_failed_write_does_not_block_others() {
        let inner = MemorySiteStore::new();
        for domain in ["a.test", "b.test", "c.test"] {
            inner.upsert(&site(domain, false)).unwrap();
        }
        let store = Arc::new(StubbornStore {
            inner,
            refuse: "b.test".to_string(),
        });

        let report = monitor(store.clone(), Arc::new(TableProber::default()))
            .run_pass()
            .await
            .unwrap();

        assert_eq!(report.probed, 3);
        assert_eq!(report.update_failures.len(), 1);
        assert_eq!(report.update_failures[0].0, "b.test");
        assert!(store.get("a.test").unwrap().last_checked_at.is_some());
        assert!(store.get("b.test").unwrap().last_checked_at.is_none());
        assert!(store.get("c.test").unwrap().last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let report = monitor(Arc::new(MemorySiteStore::new()), Arc::new(TableProber::default()))
            .run_pass()
            .await
            .unwrap();
        assert_eq!(report.probed, 0);
    }

    #[test]
    fn test_http_prober_builds() {
        assert!(HttpProber::new(&MonitorConfig::default()).is_ok());
    }
}
