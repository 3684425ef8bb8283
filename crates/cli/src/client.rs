//! Host access for CLI commands
//!
//! Commands run in-process against the same registry database, nginx
//! layout and host tools the daemon uses. With `--dry-run` they run
//! against a scratch copy instead: the registry is copied into memory, the
//! filesystem layout is rooted in a temporary directory and host tools are
//! recorded rather than executed.

use anyhow::{Context, Result};
use colored::Colorize;
use sitewarden_common::{CommandRunner, Database, ScriptedRunner, SystemRunner};
use sitewarden_daemon::{open_store, DaemonConfig, MemorySiteStore, SiteManager, SiteStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

/// Options shared by every command
#[derive(Debug, Clone)]
pub struct HostOptions {
    pub config: PathBuf,
    pub store: Option<PathBuf>,
    pub dry_run: bool,
}

pub struct HostClient {
    manager: SiteManager,
    dry_run: Option<DryRun>,
}

struct DryRun {
    scratch: TempDir,
    runner: Arc<ScriptedRunner>,
}

impl HostClient {
    pub fn open(options: &HostOptions) -> Result<Self> {
        let mut config = DaemonConfig::load(&options.config)
            .with_context(|| format!("loading {}", options.config.display()))?;
        if let Some(store) = &options.store {
            config.store_path = store.clone();
        }

        if options.dry_run {
            return Self::open_dry_run(&config);
        }

        let store = open_store(&config)?;
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        Ok(Self {
            manager: SiteManager::new(config, store, runner),
            dry_run: None,
        })
    }

    fn open_dry_run(config: &DaemonConfig) -> Result<Self> {
        let scratch = TempDir::new()?;
        let mut scratch_config = DaemonConfig::rooted_at(scratch.path());
        scratch_config.web_server.binary = config.web_server.binary.clone();
        scratch_config.web_server.service = config.web_server.service.clone();
        scratch_config.tls.tool = config.tls.tool.clone();
        scratch_config.tls.default_email = config.tls.default_email.clone();
        scratch_config.database_probe = config.database_probe.clone();
        scratch_config.monitor = config.monitor.clone();

        let store = Arc::new(MemorySiteStore::new());
        let db_path = config.db_path();
        if db_path.exists() {
            let db = Database::open(&db_path)?;
            for site in db.list_sites()? {
                store.upsert(&site)?;
            }
            debug!("Copied registry from {:?} into memory", db_path);
        }

        let runner = Arc::new(ScriptedRunner::dry_run());
        runner.accept_config_check(&scratch_config.web_server.binary);
        Ok(Self {
            manager: SiteManager::new(scratch_config, store, runner.clone()),
            dry_run: Some(DryRun { scratch, runner }),
        })
    }

    pub fn manager(&self) -> &SiteManager {
        &self.manager
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run.is_some()
    }

    /// Report what a dry run would have done on the host
    pub fn finish(self) -> Result<()> {
        let Some(dry_run) = self.dry_run else {
            return Ok(());
        };

        println!();
        println!("{}", "Dry run: nothing on this host was changed.".yellow().bold());

        let commands = dry_run.runner.invocations();
        if !commands.is_empty() {
            println!("Commands that would run:");
            for command in commands {
                println!("  {}", command.dimmed());
            }
        }

        let files = scratch_files(dry_run.scratch.path());
        if !files.is_empty() {
            println!("Files that would be written (relative to their configured roots):");
            for file in files {
                println!("  {}", file.display());
            }
        }

        Ok(())
    }
}

fn scratch_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();

    files.sort();
    files
}
