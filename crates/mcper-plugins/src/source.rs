//! Plugin source classification and canonical artifact URLs.
//!
//! A plugin source string is one of:
//!
//! | Form | Example | Variant |
//! |---|---|---|
//! | local path | `./plugin-github.wasm`, `/opt/p.wasm` | [`PluginSource::LocalFile`] |
//! | registry artifact | `{base}/v0.1.0/plugin-github.wasm` | [`PluginSource::RegistryArtifact`] |
//! | remote MCP server | `http://localhost:3000/mcp` | [`PluginSource::RemoteHttpEndpoint`] |
//!
//! Parsing never performs I/O.

use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use url::Url;

use crate::error::{PluginError, PluginResult};

/// Default base URL of the published plugin registry.
pub const DEFAULT_REGISTRY_BASE: &str = "https://storage.googleapis.com/mcper-releases";

/// Version marker resolving to the newest published artifact.
pub const LATEST_VERSION: &str = "latest";

/// A versioned artifact published in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryArtifact {
    /// Plugin name (`github` for `plugin-github.wasm`).
    pub name: String,
    /// Version segment of the URL (`v0.1.0` or `latest`).
    pub version: String,
    /// Download URL.
    pub url: String,
}

impl RegistryArtifact {
    /// Cache key (`name@version`).
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// Where a plugin's tools come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginSource {
    /// A module file on the local disk, read fresh on every run.
    LocalFile {
        /// Path as configured.
        path: PathBuf,
    },
    /// A module downloaded from the registry and cached by name and version.
    RegistryArtifact(RegistryArtifact),
    /// An MCP server reachable over streamable HTTP.
    RemoteHttpEndpoint {
        /// Endpoint URL.
        url: Url,
    },
}

impl PluginSource {
    /// Human-readable name: file name, artifact name or URL path.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::LocalFile { path } => path.file_name().map_or_else(
                || path.display().to_string(),
                |n| n.to_string_lossy().into_owned(),
            ),
            Self::RegistryArtifact(artifact) => artifact.name.clone(),
            Self::RemoteHttpEndpoint { url } => url.path().to_string(),
        }
    }

    /// Version of a registry artifact.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::RegistryArtifact(artifact) => Some(&artifact.version),
            _ => None,
        }
    }

    /// Whether the plugin runs as a sandboxed module.
    #[must_use]
    pub fn is_module(&self) -> bool {
        !matches!(self, Self::RemoteHttpEndpoint { .. })
    }
}

impl fmt::Display for PluginSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalFile { path } => write!(f, "local:{}", path.display()),
            Self::RegistryArtifact(a) => write!(f, "registry:{}@{}", a.name, a.version),
            Self::RemoteHttpEndpoint { url } => write!(f, "http:{url}"),
        }
    }
}

/// Instance name for a local module file: the file name without the
/// `.wasm` extension and `plugin-` prefix.
#[must_use]
pub fn local_plugin_name(path: &Path) -> String {
    let base = path
        .file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
    let stem = base.strip_suffix(".wasm").unwrap_or(&base);
    stem.strip_prefix("plugin-").unwrap_or(stem).to_string()
}

/// Parses plugin sources against one registry base URL.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    registry_base: String,
    artifact_pattern: Regex,
}

impl SourceResolver {
    /// Create a resolver for the registry at `registry_base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL cannot be turned into a pattern.
    pub fn new(registry_base: impl Into<String>) -> PluginResult<Self> {
        let registry_base = registry_base.into().trim_end_matches('/').to_string();
        let pattern = format!(
            r"^{}/([^/]+)/plugin-([^/]+)\.wasm$",
            regex::escape(&registry_base)
        );
        let artifact_pattern = Regex::new(&pattern).map_err(|e| PluginError::InvalidSource {
            input: registry_base.clone(),
            reason: format!("unusable registry base: {e}"),
        })?;

        Ok(Self {
            registry_base,
            artifact_pattern,
        })
    }

    /// Resolver for [`DEFAULT_REGISTRY_BASE`].
    ///
    /// # Errors
    ///
    /// See [`SourceResolver::new`].
    pub fn with_default_registry() -> PluginResult<Self> {
        Self::new(DEFAULT_REGISTRY_BASE)
    }

    /// Registry base URL without a trailing slash.
    #[must_use]
    pub fn registry_base(&self) -> &str {
        &self.registry_base
    }

    /// URL of the registry manifest.
    #[must_use]
    pub fn manifest_url(&self) -> String {
        format!("{}/plugins.json", self.registry_base)
    }

    /// Classify a plugin source string.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidSource`] if the string is neither a
    /// local path, a registry artifact URL nor an `http`/`https` URL.
    pub fn parse(&self, source: &str) -> PluginResult<PluginSource> {
        if source.starts_with("./") || source.starts_with('/') {
            return Ok(PluginSource::LocalFile {
                path: PathBuf::from(source),
            });
        }

        if let Some(caps) = self.artifact_pattern.captures(source) {
            let version = caps.get(1).map_or("", |m| m.as_str());
            let name = caps.get(2).map_or("", |m| m.as_str());
            return Ok(PluginSource::RegistryArtifact(RegistryArtifact {
                name: name.to_string(),
                version: version.to_string(),
                url: source.to_string(),
            }));
        }

        let url = Url::parse(source).map_err(|e| PluginError::InvalidSource {
            input: source.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => Ok(PluginSource::RemoteHttpEndpoint { url }),
            other => Err(PluginError::InvalidSource {
                input: source.to_string(),
                reason: format!("unsupported plugin scheme: {other}"),
            }),
        }
    }

    /// Canonical download URL for `name` at `version`.
    ///
    /// An empty version resolves to [`LATEST_VERSION`].
    #[must_use]
    pub fn resolve_url(&self, name: &str, version: &str) -> String {
        let version = if version.is_empty() {
            LATEST_VERSION
        } else {
            version
        };
        format!("{}/{version}/plugin-{name}.wasm", self.registry_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> SourceResolver {
        SourceResolver::with_default_registry().unwrap()
    }

    #[test]
    fn test_parse_local_paths() {
        let r = resolver();
        let src = r.parse("./plugins/plugin-github.wasm").unwrap();
        assert_eq!(
            src,
            PluginSource::LocalFile {
                path: PathBuf::from("./plugins/plugin-github.wasm")
            }
        );
        assert_eq!(src.display_name(), "plugin-github.wasm");
        assert!(src.is_module());

        let abs = r.parse("/opt/mcper/hello.wasm").unwrap();
        assert_eq!(abs.display_name(), "hello.wasm");
    }

    #[test]
    fn test_parse_registry_artifact() {
        let r = resolver();
        let src = r
            .parse("https://storage.googleapis.com/mcper-releases/v0.1.0/plugin-linkedin.wasm")
            .unwrap();
        let PluginSource::RegistryArtifact(artifact) = src else {
            panic!("expected registry artifact");
        };
        assert_eq!(artifact.name, "linkedin");
        assert_eq!(artifact.version, "v0.1.0");
        assert_eq!(artifact.cache_key(), "linkedin@v0.1.0");
    }

    #[test]
    fn test_parse_http_endpoint() {
        let r = resolver();
        let src = r.parse("http://localhost:3000/mcp").unwrap();
        assert!(matches!(src, PluginSource::RemoteHttpEndpoint { .. }));
        assert_eq!(src.display_name(), "/mcp");
        assert!(!src.is_module());

        // Other paths under the registry host are plain endpoints.
        let other = r
            .parse("https://storage.googleapis.com/mcper-releases/plugins.json")
            .unwrap();
        assert!(matches!(other, PluginSource::RemoteHttpEndpoint { .. }));
    }

    #[test]
    fn test_parse_rejects_unsupported() {
        let r = resolver();
        let err = r.parse("ftp://example.com/plugin.wasm").unwrap_err();
        assert!(err.to_string().contains("unsupported plugin scheme: ftp"));

        let err = r.parse("github").unwrap_err();
        assert!(matches!(err, PluginError::InvalidSource { .. }));
    }

    #[test]
    fn test_parse_is_deterministic() {
        let r = resolver();
        let a = r.parse("https://storage.googleapis.com/mcper-releases/latest/plugin-x.wasm");
        let b = r.parse("https://storage.googleapis.com/mcper-releases/latest/plugin-x.wasm");
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[test]
    fn test_resolve_url() {
        let r = resolver();
        assert_eq!(
            r.resolve_url("github", ""),
            "https://storage.googleapis.com/mcper-releases/latest/plugin-github.wasm"
        );
        assert_eq!(r.resolve_url("github", "v2.0.0"), r.resolve_url("github", "v2.0.0"));

        let parsed = r.parse(&r.resolve_url("gmail", "v1.2.0")).unwrap();
        assert_eq!(parsed.version(), Some("v1.2.0"));
    }

    #[test]
    fn test_custom_registry_base() {
        let r = SourceResolver::new("http://127.0.0.1:8080/releases/").unwrap();
        assert_eq!(r.registry_base(), "http://127.0.0.1:8080/releases");
        assert_eq!(r.manifest_url(), "http://127.0.0.1:8080/releases/plugins.json");
        let src = r.parse("http://127.0.0.1:8080/releases/v1/plugin-echo.wasm").unwrap();
        assert!(matches!(src, PluginSource::RegistryArtifact(_)));
    }

    #[test]
    fn test_local_plugin_name() {
        assert_eq!(local_plugin_name(Path::new("./plugin-github.wasm")), "github");
        assert_eq!(local_plugin_name(Path::new("/x/hello.wasm")), "hello");
        assert_eq!(local_plugin_name(Path::new("/x/tool")), "tool");
    }
}
