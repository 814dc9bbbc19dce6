//! Cloud account status and logout.

use anyhow::Context;
use chrono::{DateTime, Utc};
use mcper_plugins::{Credentials, IntegrityCache, fetch_remote_servers};

use super::resolve_home;
use crate::theme::Theme;

/// Rough remaining time, e.g. `3d 4h` or `12m`.
fn format_remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = expires_at.signed_duration_since(now);
    if remaining.num_seconds() <= 0 {
        return "expired".to_string();
    }
    let days = remaining.num_days();
    let hours = remaining.num_hours().rem_euclid(24);
    let minutes = remaining.num_minutes().rem_euclid(60);
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Print login state, remote servers and the cached plugin count.
pub(crate) async fn show_status() -> anyhow::Result<()> {
    let home = resolve_home()?;
    let credentials = Credentials::load(&home.credentials_path())
        .context("failed to read credentials")?;

    match credentials {
        None => {
            println!("{}", Theme::kv("Status", "Not logged in"));
        },
        Some(creds) if !creds.is_valid() => {
            println!("{}", Theme::kv("Status", "Logged in (credentials expired)"));
            println!("{}", Theme::kv("User", &creds.user_email));
        },
        Some(creds) => {
            println!("{}", Theme::kv("Status", "Logged in"));
            println!("{}", Theme::kv("User", &creds.user_email));
            println!("{}", Theme::kv("Cloud", creds.cloud_url()));
            if let Some(expires_at) = creds.expires_at {
                println!(
                    "{}",
                    Theme::kv(
                        "API key expires",
                        &format!(
                            "{} ({} remaining)",
                            expires_at.to_rfc3339(),
                            format_remaining(expires_at, Utc::now())
                        )
                    )
                );
            }

            let client = mcper_plugins::http_client()?;
            match fetch_remote_servers(&client, &creds).await {
                Ok(servers) if servers.is_empty() => {
                    println!("\n{}", Theme::dimmed("No remote servers"));
                },
                Ok(servers) => {
                    println!("\n{}", Theme::header("Remote Servers"));
                    for server in &servers {
                        println!("  {:<20} {}", server.name, Theme::dimmed(&server.url));
                    }
                },
                Err(e) => {
                    println!(
                        "\n{}",
                        Theme::warning(&format!("Could not fetch remote servers: {e}"))
                    );
                },
            }
        },
    }

    if let Ok(entries) = IntegrityCache::from_home(&home).list() {
        println!("\n{}", Theme::kv("Cached plugins", &entries.len().to_string()));
    }
    Ok(())
}

/// Delete stored credentials.
pub(crate) fn logout() -> anyhow::Result<()> {
    let home = resolve_home()?;
    let path = home.credentials_path();
    let credentials = Credentials::load(&path).ok().flatten();
    if !Credentials::delete(&path).context("failed to delete credentials")? {
        println!("{}", Theme::info("Not logged in"));
        return Ok(());
    }

    match credentials.filter(|c| !c.user_email.is_empty()) {
        Some(creds) => println!(
            "{}",
            Theme::success(&format!("Logged out from {}", creds.user_email))
        ),
        None => println!("{}", Theme::success("Logged out")),
    }
    Ok(())
}
