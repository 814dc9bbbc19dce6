//! Subcommand implementations.

pub(crate) mod account;
pub(crate) mod bridge;
pub(crate) mod cache;
pub(crate) mod plugin;
pub(crate) mod registry;
pub(crate) mod serve;

use std::path::PathBuf;

use anyhow::Context;

/// Project configuration file for the current directory.
pub(crate) fn current_project_config() -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(mcper_core::project_config_path(&cwd))
}

/// Resolve and create the mcper home directory.
pub(crate) fn resolve_home() -> anyhow::Result<mcper_core::McperHome> {
    let home = mcper_core::McperHome::resolve().context("failed to resolve mcper home")?;
    home.ensure()
        .with_context(|| format!("failed to create {}", home.root().display()))?;
    Ok(home)
}
