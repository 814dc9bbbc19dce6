//! Artifact cache commands.

use anyhow::Context;
use mcper_plugins::IntegrityCache;

use super::resolve_home;
use crate::theme::{Theme, human_size};

fn open_cache() -> anyhow::Result<IntegrityCache> {
    Ok(IntegrityCache::from_home(&resolve_home()?))
}

/// List cached artifacts with their versions, sizes and download times.
pub(crate) fn list_cache() -> anyhow::Result<()> {
    let cache = open_cache()?;
    let entries = cache
        .list()
        .context("failed to read cache directory")?;
    if entries.is_empty() {
        println!("{}", Theme::info("No plugins cached"));
        return Ok(());
    }

    println!("{}", Theme::header("Cached Plugins"));
    println!(
        "  {:<20} {:<10} {:>10}  {:<16}  SHA256",
        "NAME", "VERSION", "SIZE", "DOWNLOADED"
    );
    println!("{}", Theme::separator());
    let mut total: u64 = 0;
    for entry in &entries {
        total = total.saturating_add(entry.size_bytes());
        let downloaded = entry
            .metadata
            .as_ref()
            .map_or_else(|| "-".to_string(), |m| Theme::timestamp(&m.downloaded_at));
        let hash = entry
            .content_hash()
            .map_or_else(|| "-".to_string(), |h| h.chars().take(12).collect());
        println!(
            "  {:<20} {:<10} {:>10}  {:<16}  {}",
            entry.name(),
            entry.version().unwrap_or_else(|| "-".to_string()),
            human_size(entry.size_bytes()),
            downloaded,
            Theme::dimmed(&hash)
        );
    }
    println!(
        "\n{}",
        Theme::dimmed(&format!(
            "{} artifact(s), {} in {}",
            entries.len(),
            human_size(total),
            cache.plugins_dir().display()
        ))
    );
    Ok(())
}

/// Delete the cache directory.
pub(crate) fn clean_cache() -> anyhow::Result<()> {
    let cache = open_cache()?;
    cache.clean().context("failed to clean cache")?;
    println!(
        "{}",
        Theme::success(&format!("Cache cleared: {}", cache.root().display()))
    );
    Ok(())
}

/// Print the cache directory.
pub(crate) fn print_cache_path() -> anyhow::Result<()> {
    println!("{}", open_cache()?.root().display());
    Ok(())
}
