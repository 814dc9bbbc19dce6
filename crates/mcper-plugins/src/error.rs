//! Plugin error types.

use std::path::PathBuf;

/// Errors from plugin resolution, caching and registry access.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The plugin source string could not be classified.
    #[error("invalid plugin source {input:?}: {reason}")]
    InvalidSource {
        /// The source string as configured.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A cached artifact no longer matches its recorded hash.
    #[error("integrity mismatch for {name}@{version}: expected sha256 {expected}, found {actual}")]
    IntegrityMismatch {
        /// Artifact name.
        name: String,
        /// Artifact version.
        version: String,
        /// Hash recorded in metadata.
        expected: String,
        /// Hash of the bytes on disk.
        actual: String,
    },

    /// Download exceeded the size limit.
    #[error("artifact too large: {size} bytes exceeds limit of {limit} bytes")]
    ArtifactTooLarge {
        /// Bytes received (or declared).
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    /// An HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A plugin name is not in the registry manifest.
    #[error("plugin '{0}' not found in registry. Run 'mcper registry list' to see available plugins")]
    NotInRegistry(String),

    /// The project configuration is invalid or already contains the plugin.
    #[error("config error: {0}")]
    Config(String),

    /// Credentials could not be read or written.
    #[error("credentials error: {0}")]
    Credentials(String),

    /// Filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PluginError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
