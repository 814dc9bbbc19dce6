//! `mcper serve` - the aggregated MCP server.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use mcper_aggregator::{Aggregator, AggregatorServer, AggregatorSettings};
use mcper_plugins::{Credentials, ProjectConfig};
use tracing::{info, warn};

use super::resolve_home;

/// Load the plugin list from inline JSON, an explicit file or the project
/// default, in that order.
fn load_config(
    config_path: Option<&Path>,
    config_json: Option<&str>,
    default_path: &Path,
) -> anyhow::Result<ProjectConfig> {
    if let Some(json) = config_json {
        return ProjectConfig::from_json(json).context("invalid --config-json");
    }
    match config_path {
        Some(path) => ProjectConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => ProjectConfig::load_or_default(default_path)
            .with_context(|| format!("failed to load {}", default_path.display())),
    }
}

/// Run until the client disconnects or the process is interrupted.
pub(crate) async fn run_serve(
    config_path: Option<PathBuf>,
    config_json: Option<String>,
) -> anyhow::Result<()> {
    let home = resolve_home()?;
    let project_root = std::env::current_dir().context("failed to get current directory")?;

    let mut settings = AggregatorSettings::new(&home, &project_root);
    let config = load_config(
        config_path.as_deref(),
        config_json.as_deref(),
        &settings.project_config,
    )?;
    if let Some(path) = config_path {
        settings.project_config = path;
    }

    let credentials = match Credentials::load(&home.credentials_path()) {
        Ok(credentials) => credentials,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable credentials");
            None
        },
    };
    let settings = settings.with_credentials(credentials);

    info!(plugins = config.plugins.len(), version = mcper_core::VERSION, "starting mcper");
    let aggregator = Aggregator::start(settings, &config)
        .await
        .context("failed to start plugins")?;

    let server = AggregatorServer::new(Arc::clone(&aggregator));
    let result = tokio::select! {
        served = server.serve_stdio() => served.context("MCP server failed"),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            Ok(())
        },
    };

    aggregator.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_json_wins() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "[[plugins]]\nsource = \"./from-file.wasm\"\n").unwrap();

        let config = load_config(
            Some(file.as_path()),
            Some(r#"{"plugins": [{"source": "./inline.wasm"}]}"#),
            &file,
        )
        .unwrap();
        assert_eq!(config.plugins[0].source, "./inline.wasm");

        let config = load_config(Some(file.as_path()), None, &file).unwrap();
        assert_eq!(config.plugins[0].source, "./from-file.wasm");
    }

    #[test]
    fn test_missing_default_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(None, None, &dir.path().join("absent.toml")).unwrap();
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn test_bad_inline_json() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(None, Some("{"), &dir.path().join("x.toml")).is_err());
    }
}
