//! mcper Plugins - where plugin bytes come from and whether they can be trusted.
//!
//! This crate provides:
//! - [`SourceResolver`]: classifies plugin source strings into local files,
//!   versioned registry artifacts and remote HTTP endpoints
//! - [`IntegrityCache`]: on-disk artifact store with SHA-256 metadata
//! - [`ArtifactFetcher`]: cache-or-download with a size limit
//! - [`RegistryManifest`]: the published plugin index used for short names
//! - [`ProjectConfig`]: the per-project plugin list
//! - [`Credentials`] and [`RemoteServer`]: cloud account state and discovery

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod cache;
pub mod config;
pub mod credentials;
mod error;
pub mod fetch;
pub mod manifest;
pub mod remote;
pub mod source;

pub use cache::{CacheEntry, CacheMetadata, IntegrityCache, Permissions};
pub use config::{PluginConfig, ProjectConfig};
pub use credentials::{Credentials, DEFAULT_CLOUD_URL};
pub use error::{PluginError, PluginResult};
pub use fetch::{ArtifactFetcher, ArtifactOrigin, FetchedArtifact, MAX_ARTIFACT_SIZE, read_local};
pub use manifest::{RegistryManifest, RegistryPlugin, is_short_name};
pub use remote::{RemoteServer, fetch_remote_servers};
pub use source::{
    DEFAULT_REGISTRY_BASE, LATEST_VERSION, PluginSource, RegistryArtifact, SourceResolver,
    local_plugin_name,
};

/// Build the HTTP client used for registry, artifact and cloud requests.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn http_client() -> PluginResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("mcper/{}", mcper_core::VERSION))
        .redirect(reqwest::redirect::Policy::limited(10))
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .map_err(|e| PluginError::Http(format!("failed to create HTTP client: {e}")))
}
