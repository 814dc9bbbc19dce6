//! Project plugin list commands: add, remove, list and update.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, bail};
use mcper_plugins::{
    PluginConfig, PluginSource, ProjectConfig, RegistryManifest, SourceResolver, is_short_name,
};

use super::current_project_config;
use crate::theme::Theme;

/// Parse `PLUGIN_VAR=HOST_VAR` pairs.
fn parse_env_mappings(pairs: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((module_var, host_var)) if !module_var.is_empty() && !host_var.is_empty() => {
                Ok((module_var.to_string(), host_var.to_string()))
            },
            _ => bail!("invalid env mapping '{pair}', expected PLUGIN_VAR=HOST_VAR"),
        })
        .collect()
}

fn load_existing(path: &Path) -> anyhow::Result<ProjectConfig> {
    if !path.exists() {
        bail!(
            "no {} found. Run 'mcper add <plugin>' to create one",
            path.display()
        );
    }
    ProjectConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

async fn fetch_manifest(resolver: &SourceResolver) -> anyhow::Result<RegistryManifest> {
    let client = mcper_plugins::http_client()?;
    RegistryManifest::fetch(&client, resolver)
        .await
        .context("failed to fetch plugins registry")
}

/// Add a plugin to `.mcper/config.toml`, creating the file if needed.
///
/// Short names are resolved through the registry. Without explicit `--env`
/// mappings, every variable the registry lists is mapped to itself.
pub(crate) async fn add_plugin(spec: &str, env: &[String]) -> anyhow::Result<()> {
    let config_path = current_project_config()?;
    let mut config = ProjectConfig::load_or_default(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let resolver = SourceResolver::with_default_registry()?;
    let mut env_map = parse_env_mappings(env)?;

    let (source, description) = if is_short_name(spec) {
        let manifest = fetch_manifest(&resolver).await?;
        let (url, entry) = manifest
            .resolve_short_name(&resolver, spec)
            .context("run 'mcper registry list' to see available plugins")?;
        if env_map.is_empty() {
            env_map = entry.env.iter().map(|v| (v.clone(), v.clone())).collect();
        }
        (url, Some(entry.description.clone()))
    } else {
        (spec.to_string(), None)
    };

    let parsed = resolver
        .parse(&source)
        .with_context(|| format!("invalid plugin source: {source}"))?;

    let mut plugin = PluginConfig::new(source.clone());
    plugin.env = env_map;
    let env_summary: Vec<String> = plugin
        .env
        .iter()
        .map(|(module_var, host_var)| format!("{module_var} -> ${host_var}"))
        .collect();
    config.add_plugin(plugin)?;
    config
        .save(&config_path)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    println!("{}", Theme::success(&format!("Added plugin: {source}")));
    if parsed.is_module() {
        println!("  {}", Theme::kv("Name", &parsed.display_name()));
        if let Some(version) = parsed.version() {
            println!("  {}", Theme::kv("Version", version));
        }
    }
    if let Some(description) = description {
        println!("  {}", Theme::kv("Description", &description));
    }
    if !env_summary.is_empty() {
        println!("  {}", Theme::kv("Environment", &env_summary.join(", ")));
    }
    Ok(())
}

/// Remove the plugin configured with exactly `source`.
pub(crate) fn remove_plugin(source: &str) -> anyhow::Result<()> {
    let config_path = current_project_config()?;
    let mut config = load_existing(&config_path)?;
    if !config.remove_plugin(source) {
        bail!("plugin {source} is not configured");
    }
    config
        .save(&config_path)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    println!("{}", Theme::success(&format!("Removed plugin: {source}")));
    Ok(())
}

/// Print the configured plugins as a table or JSON.
pub(crate) fn list_plugins(json: bool) -> anyhow::Result<()> {
    let config_path = current_project_config()?;
    let config = load_existing(&config_path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config.plugins)?);
        return Ok(());
    }
    if config.plugins.is_empty() {
        println!("{}", Theme::info("No plugins configured"));
        println!("{}", Theme::dimmed("Add one with: mcper add <plugin>"));
        return Ok(());
    }

    let resolver = SourceResolver::with_default_registry()?;
    println!("{}", Theme::header("Configured Plugins"));
    println!("  {:<24} {:<10} {:<12} SOURCE", "NAME", "VERSION", "ENV VARS");
    println!("{}", Theme::separator());
    for plugin in &config.plugins {
        let parsed = resolver.parse(&plugin.source).ok();
        let name = parsed
            .as_ref()
            .map_or_else(|| "unknown".to_string(), PluginSource::display_name);
        let version = parsed
            .as_ref()
            .and_then(PluginSource::version)
            .unwrap_or("-");
        let env = if plugin.env.is_empty() {
            "-".to_string()
        } else {
            plugin.env.len().to_string()
        };
        println!(
            "  {name:<24} {version:<10} {env:<12} {}",
            Theme::dimmed(&plugin.source)
        );
    }
    println!(
        "\n{}",
        Theme::dimmed(&format!("Total: {} plugin(s)", config.plugins.len()))
    );
    Ok(())
}

/// Point every registry plugin at the version the registry currently
/// publishes. Returns `(index, name, new_source)` for each change.
fn plan_updates(
    config: &ProjectConfig,
    manifest: &RegistryManifest,
    resolver: &SourceResolver,
) -> Vec<(usize, String, String)> {
    config
        .plugins
        .iter()
        .enumerate()
        .filter_map(|(index, plugin)| {
            let Ok(PluginSource::RegistryArtifact(artifact)) = resolver.parse(&plugin.source)
            else {
                return None;
            };
            let latest = manifest.latest_source(resolver, &artifact.name)?;
            (latest != plugin.source).then(|| (index, artifact.name, latest))
        })
        .collect()
}

/// Update registry plugins in the project configuration.
pub(crate) async fn update_plugins() -> anyhow::Result<()> {
    let config_path = current_project_config()?;
    let mut config = load_existing(&config_path)?;
    let resolver = SourceResolver::with_default_registry()?;
    let manifest = fetch_manifest(&resolver).await?;

    let updates = plan_updates(&config, &manifest, &resolver);
    if updates.is_empty() {
        println!("{}", Theme::success("All plugins are up to date"));
        return Ok(());
    }

    for (index, name, latest) in &updates {
        let Some(plugin) = config.plugins.get_mut(*index) else {
            continue;
        };
        println!("{}", Theme::info(&format!("Updating {name}...")));
        println!("  {}", Theme::kv("Old", &plugin.source));
        println!("  {}", Theme::kv("New", latest));
        plugin.source.clone_from(latest);
    }
    config
        .save(&config_path)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    println!(
        "{}",
        Theme::success(&format!("Updated {} plugin(s)", updates.len()))
    );
    Ok(())
}
