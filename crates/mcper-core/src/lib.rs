//! mcper Core - shared foundations for the mcper tool aggregator.
//!
//! This crate provides:
//! - The global home directory layout ([`dirs::McperHome`])
//! - Product-wide constants (version, server name)

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod dirs;

pub use dirs::{McperHome, PROJECT_CONFIG_FILE, PROJECT_DIR_NAME, project_config_path};

/// Name the aggregator advertises to MCP clients.
pub const SERVER_NAME: &str = "mcper";

/// Version of the mcper workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
