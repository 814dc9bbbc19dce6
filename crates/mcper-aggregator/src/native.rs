//! Built-in tools published under `mcper/native/`.

use std::fmt::Write;
use std::path::PathBuf;

use mcper_plugins::{
    IntegrityCache, PluginSource, ProjectConfig, RegistryManifest, RegistryPlugin, SourceResolver,
};
use rmcp::model::{CallToolResult, Content, JsonObject};
use serde_json::{Value, json};

/// The built-in tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeTool {
    /// List the registry manifest.
    RegistryList,
    /// Search the registry manifest.
    RegistrySearch,
    /// List the project's configured plugins.
    PluginList,
    /// List cached artifacts.
    CacheList,
    /// Version and install locations.
    Version,
    /// Details of one registry plugin.
    PluginInfo,
}

impl NativeTool {
    /// Every built-in tool.
    pub const ALL: [Self; 6] = [
        Self::RegistryList,
        Self::RegistrySearch,
        Self::PluginList,
        Self::CacheList,
        Self::Version,
        Self::PluginInfo,
    ];

    /// Tool name without the namespace.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::RegistryList => "registry_list",
            Self::RegistrySearch => "registry_search",
            Self::PluginList => "plugin_list",
            Self::CacheList => "cache_list",
            Self::Version => "version",
            Self::PluginInfo => "plugin_info",
        }
    }

    /// Description shown to the client.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::RegistryList => {
                "List all available plugins in the mcper registry. Returns plugin names, descriptions, versions, and required environment variables."
            },
            Self::RegistrySearch => {
                "Search for plugins in the mcper registry by name or description."
            },
            Self::PluginList => {
                "List all plugins configured in the current project's .mcper/config.toml file."
            },
            Self::CacheList => {
                "List all cached WASM plugins with their metadata including size, hash, and download date."
            },
            Self::Version => "Get the current mcper version and installation information.",
            Self::PluginInfo => "Get detailed information about a specific plugin from the registry.",
        }
    }

    /// JSON Schema of the arguments.
    #[must_use]
    pub fn input_schema(self) -> JsonObject {
        let schema = match self {
            Self::RegistrySearch => string_arg(
                "query",
                "Search query to match against plugin names and descriptions",
            ),
            Self::PluginInfo => string_arg(
                "name",
                "Name of the plugin to get info for (e.g., 'github', 'gmail')",
            ),
            _ => json!({"type": "object", "properties": {}}),
        };
        match schema {
            Value::Object(map) => map,
            _ => JsonObject::new(),
        }
    }

    /// Run the tool. Failures are returned as error results.
    pub async fn invoke(self, ctx: &NativeContext, args: Option<&JsonObject>) -> CallToolResult {
        match self {
            Self::RegistryList => match ctx.manifest().await {
                Ok(manifest) => text_result(render_registry_list(&manifest)),
                Err(e) => error_result(format!("Failed to fetch registry: {e}")),
            },
            Self::RegistrySearch => {
                let Some(query) = string_param(args, "query") else {
                    return error_result("Missing required parameter: query");
                };
                match ctx.manifest().await {
                    Ok(manifest) => text_result(render_search(&manifest, query)),
                    Err(e) => error_result(format!("Failed to fetch registry: {e}")),
                }
            },
            Self::PluginList => ctx.plugin_list(),
            Self::CacheList => ctx.cache_list(),
            Self::Version => text_result(ctx.version_info()),
            Self::PluginInfo => {
                let Some(name) = string_param(args, "name") else {
                    return error_result("Missing required parameter: name");
                };
                match ctx.manifest().await {
                    Ok(manifest) => text_result(render_plugin_info(&manifest, &ctx.resolver, name)),
                    Err(e) => error_result(format!("Failed to fetch registry: {e}")),
                }
            },
        }
    }
}

fn string_arg(name: &str, description: &str) -> Value {
    json!({
        "type": "object",
        "properties": { name: { "type": "string", "description": description } },
        "required": [name],
    })
}

fn string_param<'a>(args: Option<&'a JsonObject>, key: &str) -> Option<&'a str> {
    args.and_then(|a| a.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn text_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text.into())])
}

fn error_result(message: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(message.into())])
}

/// State the built-in tools read.
#[derive(Debug, Clone)]
pub struct NativeContext {
    /// HTTP client for the registry.
    pub client: reqwest::Client,
    /// Registry resolver.
    pub resolver: SourceResolver,
    /// Artifact cache.
    pub cache: IntegrityCache,
    /// Project configuration file.
    pub project_config: PathBuf,
    /// mcper home directory.
    pub home: PathBuf,
}

impl NativeContext {
    async fn manifest(&self) -> mcper_plugins::PluginResult<RegistryManifest> {
        RegistryManifest::fetch(&self.client, &self.resolver).await
    }

    fn plugin_list(&self) -> CallToolResult {
        if !self.project_config.exists() {
            return text_result(format!(
                "No {} found. Run 'mcper add <plugin>' to create one.",
                self.project_config.display()
            ));
        }
        let config = match ProjectConfig::load(&self.project_config) {
            Ok(config) => config,
            Err(e) => return error_result(format!("Failed to read project config: {e}")),
        };
        if config.plugins.is_empty() {
            return text_result("No plugins configured.\n\nTo add a plugin: `mcper add <name>`");
        }

        let mut out = format!(
            "# Configured Plugins\n\nFound {} plugins in {}:\n\n",
            config.plugins.len(),
            self.project_config.display()
        );
        for (i, plugin) in config.plugins.iter().enumerate() {
            let parsed = self.resolver.parse(&plugin.source).ok();
            let name = parsed
                .as_ref()
                .map_or_else(|| "unknown".to_string(), PluginSource::display_name);
            let _ = write!(out, "## {}. {name}", i.saturating_add(1));
            if let Some(version) = parsed.as_ref().and_then(PluginSource::version) {
                let _ = write!(out, " ({version})");
            }
            let _ = writeln!(out);
            let _ = writeln!(out, "**Source:** `{}`", plugin.source);
            if !plugin.env.is_empty() {
                out.push_str("**Environment mappings:**\n");
                for (module_var, host_var) in &plugin.env {
                    let _ = writeln!(out, "  - {module_var} -> ${host_var}");
                }
            }
            out.push('\n');
        }
        text_result(out)
    }

    fn cache_list(&self) -> CallToolResult {
        let entries = match self.cache.list() {
            Ok(entries) => entries,
            Err(e) => return error_result(format!("Failed to read cache directory: {e}")),
        };
        if entries.is_empty() {
            return text_result("No plugins cached yet.");
        }

        let mut out = format!(
            "# Cached Plugins\n\nFound {} cached plugins in {}:\n\n",
            entries.len(),
            self.cache.plugins_dir().display()
        );
        for entry in &entries {
            let _ = writeln!(out, "## {}", entry.name());
            if let Some(version) = entry.version() {
                let _ = writeln!(out, "**Version:** {version}");
            }
            let _ = writeln!(out, "**Size:** {:.2} KB", kib(entry.size_bytes()));
            if let Some(meta) = &entry.metadata {
                let _ = writeln!(out, "**Downloaded:** {}", meta.downloaded_at);
                let short: String = meta.sha256.chars().take(16).collect();
                let _ = writeln!(out, "**SHA256:** {short}...");
            }
            out.push('\n');
        }
        text_result(out)
    }

    fn version_info(&self) -> String {
        format!(
            "# MCPer Version Info\n\n**Version:** {}\n**Home:** {}\n**Registry:** {}\n**Cache:** {}\n",
            mcper_core::VERSION,
            self.home.display(),
            self.resolver.manifest_url(),
            self.cache.root().display()
        )
    }
}

#[allow(clippy::cast_precision_loss)]
fn kib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

fn render_plugin_summary(out: &mut String, p: &RegistryPlugin, always_env: bool) {
    let _ = writeln!(out, "## {} (v{})", p.name, p.version.trim_start_matches('v'));
    let _ = writeln!(out, "**Description:** {}", p.description);
    if !p.env.is_empty() {
        let _ = writeln!(out, "**Required env vars:** {}", p.env.join(", "));
    } else if always_env {
        out.push_str("**Required env vars:** None\n");
    }
    let _ = writeln!(out, "**Install:** `mcper add {}`\n", p.name);
}

fn render_registry_list(manifest: &RegistryManifest) -> String {
    if manifest.plugins.is_empty() {
        return "No plugins available in the registry.".to_string();
    }
    let mut out = format!(
        "# MCPer Plugin Registry\n\nFound {} plugins:\n\n",
        manifest.plugins.len()
    );
    for p in &manifest.plugins {
        render_plugin_summary(&mut out, p, true);
    }
    out
}

fn render_search(manifest: &RegistryManifest, query: &str) -> String {
    let matches = manifest.search(query);
    if matches.is_empty() {
        return format!("No plugins found matching '{query}'.");
    }
    let mut out = format!(
        "# Search Results for '{query}'\n\nFound {} matching plugins:\n\n",
        matches.len()
    );
    for p in matches {
        render_plugin_summary(&mut out, p, false);
    }
    out
}

fn render_plugin_info(manifest: &RegistryManifest, resolver: &SourceResolver, name: &str) -> String {
    let Some(p) = manifest.find(name) else {
        return format!(
            "Plugin '{name}' not found in registry.\n\nRun `mcper/native/registry_list` to see available plugins."
        );
    };

    let mut out = format!("# Plugin: {}\n\n", p.name);
    let _ = writeln!(out, "**Version:** {}", p.version);
    let _ = writeln!(out, "**Description:** {}", p.description);
    if let Some(author) = &p.author {
        let _ = writeln!(out, "**Author:** {author}");
    }
    let _ = writeln!(out, "**Source:** {}", p.source);
    if p.env.is_empty() {
        out.push_str("\n**Required Environment Variables:** None\n");
    } else {
        out.push_str("\n**Required Environment Variables:**\n");
        for var in &p.env {
            let _ = writeln!(out, "  - `{var}`");
        }
    }
    let _ = write!(
        out,
        "\n**Install Command:**\n```bash\nmcper add {}\n```\n",
        p.name
    );
    let _ = writeln!(
        out,
        "\n**Download URL:** {}",
        resolver.resolve_url(&p.name, &p.version)
    );
    out
}
