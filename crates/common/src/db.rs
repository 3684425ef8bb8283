//! SQLite database for site registry persistence

use crate::types::{ProbeOutcome, Site, SiteStatus, SiteType};
use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

const SITE_COLUMNS: &str = "domain, site_type, web_root, listen_port, backend_port, \
     php_runtime_version, tls_enabled, featured, status, status_code, last_checked_at, \
     created_at, updated_at";

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // WAL lets the CLI read while the daemon's monitor writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sites (
                domain TEXT PRIMARY KEY,
                site_type TEXT NOT NULL,
                web_root TEXT NOT NULL,
                listen_port INTEGER NOT NULL DEFAULT 80,
                backend_port INTEGER NOT NULL DEFAULT 0,
                php_runtime_version TEXT,
                tls_enabled INTEGER NOT NULL DEFAULT 0,
                featured INTEGER NOT NULL DEFAULT 0,
                status TEXT,
                status_code INTEGER NOT NULL DEFAULT 0,
                last_checked_at TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sites_featured ON sites(featured);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Sites
    // ========================================================================

    /// Get a site by domain
    pub fn get_site(&self, domain: &str) -> Result<Option<Site>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                &format!("SELECT {} FROM sites WHERE domain = ?1", SITE_COLUMNS),
                params![domain],
                RawSite::from_row,
            )
            .optional()?;

        row.map(RawSite::parse).transpose()
    }

    /// List all sites, featured first, then by domain
    pub fn list_sites(&self) -> Result<Vec<Site>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sites ORDER BY featured DESC, domain ASC",
            SITE_COLUMNS
        ))?;

        let rows = stmt.query_map([], RawSite::from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?.parse()?);
        }

        Ok(results)
    }

    /// Insert a site, or update the configuration fields of an existing
    /// one. Probe fields (`status`, `status_code`, `last_checked_at`) and
    /// `created_at` of an existing row are left untouched.
    pub fn upsert_site(&self, site: &Site) -> Result<Site> {
        {
            let conn = self.conn.lock();
            let now = Utc::now().timestamp();

            conn.execute(
                "INSERT INTO sites (domain, site_type, web_root, listen_port, backend_port,
                    php_runtime_version, tls_enabled, featured, status, status_code,
                    last_checked_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
                 ON CONFLICT(domain) DO UPDATE SET
                    site_type = excluded.site_type,
                    web_root = excluded.web_root,
                    listen_port = excluded.listen_port,
                    backend_port = excluded.backend_port,
                    php_runtime_version = excluded.php_runtime_version,
                    tls_enabled = excluded.tls_enabled,
                    featured = excluded.featured,
                    updated_at = excluded.updated_at",
                params![
                    site.domain,
                    site.site_type.as_str(),
                    site.web_root.to_string_lossy().to_string(),
                    site.listen_port,
                    site.backend_port,
                    site.php_runtime_version,
                    site.tls_enabled,
                    site.featured,
                    site.status.map(|s| s.as_str()),
                    site.status_code,
                    site.last_checked_at.map(stored_time),
                    now,
                ],
            )?;

            debug!("Upserted site {}", site.domain);
        }

        self.get_site(&site.domain)?
            .ok_or_else(|| Error::Internal(format!("site {} vanished after upsert", site.domain)))
    }

    /// Record a probe result. Returns false if the domain is unknown.
    pub fn record_probe(&self, domain: &str, outcome: &ProbeOutcome) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE sites SET status = ?1, status_code = ?2, last_checked_at = ?3 WHERE domain = ?4",
            params![
                outcome.status.as_str(),
                outcome.status_code,
                stored_time(outcome.checked_at),
                domain
            ],
        )?;
        Ok(rows > 0)
    }

    /// Set only the status column. Returns false if the domain is unknown.
    pub fn set_site_status(&self, domain: &str, status: SiteStatus) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE sites SET status = ?1 WHERE domain = ?2",
            params![status.as_str(), domain],
        )?;
        Ok(rows > 0)
    }

    /// Delete a site
    pub fn delete_site(&self, domain: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM sites WHERE domain = ?1", params![domain])?;

        if rows > 0 {
            debug!("Deleted site {}", domain);
        }

        Ok(rows > 0)
    }
}

/// Probe timestamps are stored as RFC 3339 text at nanosecond precision
fn stored_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Raw database row before parsing
struct RawSite {
    domain: String,
    site_type: String,
    web_root: String,
    listen_port: u16,
    backend_port: u16,
    php_runtime_version: Option<String>,
    tls_enabled: bool,
    featured: bool,
    status: Option<String>,
    status_code: u16,
    last_checked_at: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl RawSite {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            domain: row.get(0)?,
            site_type: row.get(1)?,
            web_root: row.get(2)?,
            listen_port: row.get(3)?,
            backend_port: row.get(4)?,
            php_runtime_version: row.get(5)?,
            tls_enabled: row.get(6)?,
            featured: row.get(7)?,
            status: row.get(8)?,
            status_code: row.get(9)?,
            last_checked_at: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn parse(self) -> Result<Site> {
        let last_checked_at = match self.last_checked_at.as_deref() {
            Some(text) => Some(
                DateTime::parse_from_rfc3339(text)
                    .map_err(|e| {
                        Error::Internal(format!(
                            "bad last_checked_at for {}: {} ({})",
                            self.domain, text, e
                        ))
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(Site {
            site_type: SiteType::from_label(&self.site_type),
            web_root: PathBuf::from(self.web_root),
            listen_port: self.listen_port,
            backend_port: self.backend_port,
            php_runtime_version: self.php_runtime_version,
            tls_enabled: self.tls_enabled,
            featured: self.featured,
            status: self.status.as_deref().and_then(SiteStatus::parse),
            status_code: self.status_code,
            last_checked_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            domain: self.domain,
        })
    }
}
