//! CLI Commands

pub mod cert;
pub mod monitor;
pub mod server;
pub mod site;
