//! Per-project plugin configuration (`.mcper/config.toml`).
//!
//! ```toml
//! [[plugins]]
//! source = "https://storage.googleapis.com/mcper-releases/latest/plugin-github.wasm"
//!
//! [plugins.env]
//! GITHUB_TOKEN = "MY_GITHUB_TOKEN"   # module variable -> host variable
//!
//! [plugins.permissions]
//! network = ["api.github.com"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::Permissions;
use crate::error::{PluginError, PluginResult};

/// One configured plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Plugin source string.
    pub source: String,
    /// Module variable name to host variable name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Declared capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
}

impl PluginConfig {
    /// Plugin with no env mapping or permissions.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Map module variable `module_var` to host variable `host_var`.
    #[must_use]
    pub fn with_env(mut self, module_var: impl Into<String>, host_var: impl Into<String>) -> Self {
        self.env.insert(module_var.into(), host_var.into());
        self
    }

    /// Set declared permissions.
    #[must_use]
    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = Some(permissions);
        self
    }
}

/// Plugins aggregated for one project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Configured plugins, in startup order.
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

impl ProjectConfig {
    /// Load a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> PluginResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PluginError::io(path, e))?;
        toml::from_str(&content)
            .map_err(|e| PluginError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Load `path`, or an empty config if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> PluginResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse a JSON config document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid.
    pub fn from_json(json: &str) -> PluginResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| PluginError::Config(format!("failed to parse config: {e}")))
    }

    /// Write the config as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> PluginResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| PluginError::Serialization(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PluginError::io(parent, e))?;
        }
        std::fs::write(path, content).map_err(|e| PluginError::io(path, e))
    }

    /// Append a plugin.
    ///
    /// # Errors
    ///
    /// Returns an error if a plugin with the same source is configured.
    pub fn add_plugin(&mut self, plugin: PluginConfig) -> PluginResult<()> {
        if self.has_plugin(&plugin.source) {
            return Err(PluginError::Config(format!(
                "plugin {} already exists in configuration",
                plugin.source
            )));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    /// Remove the plugin with `source`. Returns whether one was removed.
    pub fn remove_plugin(&mut self, source: &str) -> bool {
        let before = self.plugins.len();
        self.plugins.retain(|p| p.source != source);
        self.plugins.len() != before
    }

    /// Whether a plugin with `source` is configured.
    #[must_use]
    pub fn has_plugin(&self, source: &str) -> bool {
        self.plugins.iter().any(|p| p.source == source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".mcper").join("config.toml");

        let mut config = ProjectConfig::default();
        config
            .add_plugin(
                PluginConfig::new("./plugin-hello.wasm")
                    .with_env("TOKEN", "HOST_TOKEN")
                    .with_permissions(Permissions {
                        network: vec!["api.example.com".into()],
                        filesystem: vec![],
                    }),
            )
            .unwrap();
        config.save(&path).unwrap();

        let loaded = ProjectConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.plugins[0].env["TOKEN"], "HOST_TOKEN");
    }

    #[test]
    fn test_parse_toml_document() {
        let config: ProjectConfig = toml::from_str(
            r#"
            [[plugins]]
            source = "http://localhost:3000/mcp"

            [[plugins]]
            source = "./a.wasm"
            env = { KEY = "HOST_KEY" }
            "#,
        )
        .unwrap();
        assert_eq!(config.plugins.len(), 2);
        assert!(config.plugins[0].env.is_empty());
        assert!(config.plugins[1].permissions.is_none());
    }

    #[test]
    fn test_from_json() {
        let config = ProjectConfig::from_json(
            r#"{"plugins":[{"source":"./x.wasm","env":{"A":"B"},"permissions":{"filesystem":["/tmp"]}}]}"#,
        )
        .unwrap();
        let perms = config.plugins[0].permissions.as_ref().unwrap();
        assert_eq!(perms.filesystem, vec!["/tmp"]);

        assert!(ProjectConfig::from_json("{").is_err());
    }

    #[test]
    fn test_add_rejects_duplicate_and_remove() {
        let mut config = ProjectConfig::default();
        config.add_plugin(PluginConfig::new("./a.wasm")).unwrap();
        assert!(config.add_plugin(PluginConfig::new("./a.wasm")).is_err());
        assert!(config.has_plugin("./a.wasm"));

        assert!(config.remove_plugin("./a.wasm"));
        assert!(!config.remove_plugin("./a.wasm"));
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn test_load_or_default_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProjectConfig::load_or_default(&dir.path().join("none.toml")).unwrap();
        assert!(config.plugins.is_empty());
    }
}
