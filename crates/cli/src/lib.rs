//! Sitewarden CLI
//!
//! Command-line interface for managing sites, their nginx vhosts and
//! TLS certificates on this host.

pub mod client;
pub mod commands;
pub mod output;
