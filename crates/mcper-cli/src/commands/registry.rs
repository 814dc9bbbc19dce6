//! Registry browsing.

use anyhow::Context;
use mcper_plugins::{RegistryManifest, RegistryPlugin, SourceResolver};

use crate::theme::Theme;

async fn fetch() -> anyhow::Result<RegistryManifest> {
    let resolver = SourceResolver::with_default_registry()?;
    let client = mcper_plugins::http_client()?;
    RegistryManifest::fetch(&client, &resolver)
        .await
        .context("failed to fetch plugins registry")
}

fn print_table(plugins: &[&RegistryPlugin]) {
    println!("  {:<20} {:<10} DESCRIPTION", "NAME", "VERSION");
    println!("{}", Theme::separator());
    for plugin in plugins {
        println!(
            "  {:<20} {:<10} {}",
            plugin.name,
            plugin.version.trim_start_matches('v'),
            plugin.description
        );
        if !plugin.env.is_empty() {
            println!(
                "  {:<31} {}",
                "",
                Theme::dimmed(&format!("env: {}", plugin.env.join(", ")))
            );
        }
    }
}

/// List every published plugin.
pub(crate) async fn list_registry() -> anyhow::Result<()> {
    let manifest = fetch().await?;
    if manifest.plugins.is_empty() {
        println!("{}", Theme::info("No plugins available in registry"));
        return Ok(());
    }

    println!("{}", Theme::header("Available Plugins"));
    let plugins: Vec<&RegistryPlugin> = manifest.plugins.iter().collect();
    print_table(&plugins);
    println!(
        "\n{}",
        Theme::dimmed("Add a plugin with: mcper add <name>[@version]")
    );
    Ok(())
}

/// List published plugins matching `query`.
pub(crate) async fn search_registry(query: &str) -> anyhow::Result<()> {
    let manifest = fetch().await?;
    let matches = manifest.search(query);
    if matches.is_empty() {
        println!(
            "{}",
            Theme::info(&format!("No plugins found matching '{query}'"))
        );
        return Ok(());
    }

    println!(
        "{}",
        Theme::header(&format!("Plugins matching '{query}'"))
    );
    print_table(&matches);
    println!(
        "\n{}",
        Theme::dimmed(&format!("{} result(s)", matches.len()))
    );
    Ok(())
}
