//! Registry manifest (`{registry_base}/plugins.json`).

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};
use crate::source::{LATEST_VERSION, SourceResolver};

/// One published plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryPlugin {
    /// Plugin name.
    pub name: String,
    /// One-line description.
    #[serde(default)]
    pub description: String,
    /// Newest published version.
    #[serde(default)]
    pub version: String,
    /// Author, if published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Source repository or download location.
    #[serde(default)]
    pub source: String,
    /// Environment variables the plugin expects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

/// The published plugin index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryManifest {
    /// Published plugins.
    #[serde(default)]
    pub plugins: Vec<RegistryPlugin>,
}

impl RegistryManifest {
    /// Download the manifest from the resolver's registry.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status or an
    /// unparsable document.
    pub async fn fetch(client: &reqwest::Client, resolver: &SourceResolver) -> PluginResult<Self> {
        let url = resolver.manifest_url();
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| PluginError::Http(format!("failed to fetch plugins: {e}")))?;

        if !response.status().is_success() {
            return Err(PluginError::Http(format!(
                "failed to fetch plugins: HTTP {}",
                response.status()
            )));
        }

        response
            .json::<Self>()
            .await
            .map_err(|e| PluginError::Serialization(format!("failed to parse plugins manifest: {e}")))
    }

    /// Find a plugin by name, ignoring case.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&RegistryPlugin> {
        self.plugins
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Plugins whose name or description contains `query`, ignoring case.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<&RegistryPlugin> {
        let query = query.to_lowercase();
        self.plugins
            .iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&query)
                    || p.description.to_lowercase().contains(&query)
            })
            .collect()
    }

    /// Resolve `name` or `name@version` to an artifact URL.
    ///
    /// Without a version the URL points at [`LATEST_VERSION`].
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotInRegistry`] if the name is not published.
    pub fn resolve_short_name<'a>(
        &'a self,
        resolver: &SourceResolver,
        spec: &str,
    ) -> PluginResult<(String, &'a RegistryPlugin)> {
        let (name, version) = spec.split_once('@').unwrap_or((spec, ""));
        let plugin = self
            .plugins
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| PluginError::NotInRegistry(name.to_string()))?;
        let version = if version.is_empty() {
            LATEST_VERSION
        } else {
            version
        };
        Ok((resolver.resolve_url(&plugin.name, version), plugin))
    }

    /// URL of `name` at the manifest's current version.
    #[must_use]
    pub fn latest_source(&self, resolver: &SourceResolver, name: &str) -> Option<String> {
        self.find(name)
            .filter(|p| !p.version.is_empty())
            .map(|p| resolver.resolve_url(&p.name, &p.version))
    }
}

/// Whether `source` is a short registry name rather than a path or URL.
#[must_use]
pub fn is_short_name(source: &str) -> bool {
    !(source.contains("://") || source.starts_with("./") || source.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> RegistryManifest {
        serde_json::from_str(
            r#"{"plugins":[
                {"name":"github","description":"GitHub issues and PRs","version":"v0.2.0","source":"https://github.com/joshcarp/mcper","env":["GITHUB_TOKEN"]},
                {"name":"currency","description":"Exchange rates","version":"v0.1.0","author":"mcper","source":"x"}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_find_is_case_insensitive() {
        let m = manifest();
        assert_eq!(m.find("GitHub").unwrap().name, "github");
        assert!(m.find("gitlab").is_none());
    }

    #[test]
    fn test_search_matches_description() {
        let m = manifest();
        let hits = m.search("EXCHANGE");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "currency");
        assert!(m.search("nothing-here").is_empty());
    }

    #[test]
    fn test_resolve_short_name() {
        let m = manifest();
        let r = SourceResolver::with_default_registry().unwrap();

        let (url, plugin) = m.resolve_short_name(&r, "github").unwrap();
        assert_eq!(url, r.resolve_url("github", "latest"));
        assert_eq!(plugin.env, vec!["GITHUB_TOKEN"]);

        let (url, _) = m.resolve_short_name(&r, "github@v0.1.0").unwrap();
        assert!(url.ends_with("/v0.1.0/plugin-github.wasm"));

        let err = m.resolve_short_name(&r, "gitlab").unwrap_err();
        assert!(matches!(err, PluginError::NotInRegistry(_)));
    }

    #[test]
    fn test_latest_source() {
        let m = manifest();
        let r = SourceResolver::with_default_registry().unwrap();
        assert_eq!(
            m.latest_source(&r, "currency").unwrap(),
            r.resolve_url("currency", "v0.1.0")
        );
        assert!(m.latest_source(&r, "missing").is_none());
    }

    #[test]
    fn test_is_short_name() {
        assert!(is_short_name("github"));
        assert!(is_short_name("github@v1"));
        assert!(!is_short_name("./x.wasm"));
        assert!(!is_short_name("http://localhost/mcp"));
    }
}
