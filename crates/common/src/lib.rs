//! Sitewarden Common Library
//!
//! Site data model, error taxonomy, registry persistence, vhost rendering
//! and external command execution shared by the daemon and the CLI.

pub mod db;
pub mod error;
pub mod exec;
pub mod render;
pub mod types;

// Re-export commonly used types
pub use db::Database;
pub use error::{Error, Result};
pub use exec::{CommandOutput, CommandRunner, ScriptedRunner, SystemRunner};
pub use render::{parse_rendered, render, render_tls, RenderContext, RenderedFields};
pub use types::*;

/// Sitewarden version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    std::path::PathBuf::from("/var/lib/sitewarden")
}

/// Default configuration file path
pub fn default_config_path() -> std::path::PathBuf {
    std::path::PathBuf::from("/etc/sitewarden/config.toml")
}
