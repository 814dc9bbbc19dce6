//! mcper CLI - one MCP server for many sandboxed plugins.
//!
//! `mcper serve` is what an MCP client launches. The other commands edit the
//! project's plugin list, browse the registry, manage the artifact cache and
//! run the automation bridge.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod theme;

use commands::{account, bridge, cache, plugin, registry, serve};
use theme::Theme;

/// mcper - MCP tool aggregator
#[derive(Parser)]
#[command(name = "mcper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to ~/.mcper/logs
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the aggregated MCP server over stdin/stdout
    Serve {
        /// Path to a TOML plugin configuration (defaults to .mcper/config.toml)
        #[arg(short, long, conflicts_with = "config_json")]
        config: Option<PathBuf>,

        /// Inline JSON plugin configuration
        #[arg(long)]
        config_json: Option<String>,
    },

    /// Add a plugin to the project configuration
    Add {
        /// Registry name (`name` or `name@version`), local path or URL
        plugin: String,

        /// Environment mapping `PLUGIN_VAR=HOST_VAR` (repeatable)
        #[arg(short, long = "env", value_name = "PLUGIN_VAR=HOST_VAR")]
        env: Vec<String>,
    },

    /// Remove a plugin from the project configuration
    Remove {
        /// Plugin source exactly as configured
        source: String,
    },

    /// Inspect and update configured plugins
    Plugin {
        #[command(subcommand)]
        command: PluginCommands,
    },

    /// Browse the plugin registry
    Registry {
        #[command(subcommand)]
        command: RegistryCommands,
    },

    /// Manage the artifact cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Run the automation bridge on stdin/stdout with an HTTP façade
    Bridge {
        /// Façade port
        #[arg(short, long, default_value_t = mcper_bridge::http::DEFAULT_PORT)]
        port: u16,
    },

    /// Show cloud login status
    Status,

    /// Remove stored cloud credentials
    Logout,
}

#[derive(Subcommand)]
enum PluginCommands {
    /// List configured plugins
    List {
        /// Print the plugin list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move registry plugins to the registry's current versions
    Update,
}

#[derive(Subcommand)]
enum RegistryCommands {
    /// List published plugins
    List,
    /// Search published plugins by name or description
    Search {
        /// Search text
        query: String,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached artifacts
    List,
    /// Delete every cached artifact
    Clean,
    /// Print the cache directory
    Path,
}

fn setup_logging(verbose: bool, log_file: bool) {
    let level = if verbose { "debug" } else { "info" };
    let mut config = mcper_telemetry::LogConfig::new(level)
        .with_format(mcper_telemetry::LogFormat::Compact);
    if log_file {
        match mcper_core::McperHome::resolve() {
            Ok(home) => config = config.with_file_logging(home.logs_dir(), "mcper", true),
            Err(e) => eprintln!("{}", Theme::warning(&format!("File logging disabled: {e}"))),
        }
    }
    if let Err(e) = mcper_telemetry::setup_logging(&config) {
        eprintln!("Failed to initialize logging: {e}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.log_file);

    match cli.command {
        Commands::Serve {
            config,
            config_json,
        } => {
            serve::run_serve(config, config_json).await?;
        },
        Commands::Add { plugin, env } => {
            plugin::add_plugin(&plugin, &env).await?;
        },
        Commands::Remove { source } => {
            plugin::remove_plugin(&source)?;
        },
        Commands::Plugin { command } => {
            handle_plugin(command).await?;
        },
        Commands::Registry { command } => {
            handle_registry(command).await?;
        },
        Commands::Cache { command } => {
            handle_cache(&command)?;
        },
        Commands::Bridge { port } => {
            bridge::run_bridge(port).await?;
        },
        Commands::Status => {
            account::show_status().await?;
        },
        Commands::Logout => {
            account::logout()?;
        },
    }

    Ok(())
}

async fn handle_plugin(command: PluginCommands) -> Result<()> {
    match command {
        PluginCommands::List { json } => plugin::list_plugins(json),
        PluginCommands::Update => plugin::update_plugins().await,
    }
}

async fn handle_registry(command: RegistryCommands) -> Result<()> {
    match command {
        RegistryCommands::List => registry::list_registry().await,
        RegistryCommands::Search { query } => registry::search_registry(&query).await,
    }
}

fn handle_cache(command: &CacheCommands) -> Result<()> {
    match command {
        CacheCommands::List => cache::list_cache(),
        CacheCommands::Clean => cache::clean_cache(),
        CacheCommands::Path => cache::print_cache_path(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_config_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "mcper",
            "serve",
            "--config",
            "a.toml",
            "--config-json",
            "{}",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_add_collects_env_mappings() {
        let cli = Cli::try_parse_from([
            "mcper", "add", "github@2.0.0", "--env", "TOKEN=GITHUB_TOKEN", "-e", "ORG=GH_ORG",
        ])
        .unwrap();
        let Commands::Add { plugin, env } = cli.command else {
            panic!("expected add");
        };
        assert_eq!(plugin, "github@2.0.0");
        assert_eq!(env, ["TOKEN=GITHUB_TOKEN", "ORG=GH_ORG"]);
    }

    #[test]
    fn test_bridge_port_default() {
        let cli = Cli::try_parse_from(["mcper", "bridge"]).unwrap();
        assert!(matches!(cli.command, Commands::Bridge { port: 9223 }));
    }
}
