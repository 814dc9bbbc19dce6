//! On-disk integrity cache for registry artifacts.
//!
//! Layout under the cache root:
//!
//! ```text
//! plugins/
//! ├── github@v0.1.0.wasm      artifact bytes
//! └── github@v0.1.0.json      CacheMetadata
//! ```
//!
//! Every reuse recomputes the SHA-256 of the artifact and compares it to the
//! metadata in constant time. A mismatch or missing metadata makes the entry
//! invalid and the caller downloads again.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::error::{PluginError, PluginResult};
use crate::source::RegistryArtifact;

/// Capabilities a plugin declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Hosts the plugin talks to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network: Vec<String>,
    /// Host directories the plugin may access.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filesystem: Vec<String>,
}

impl Permissions {
    /// Whether nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.network.is_empty() && self.filesystem.is_empty()
    }
}

/// Provenance recorded next to each cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// URL the artifact was downloaded from.
    pub source: String,
    /// Lowercase hex SHA-256 of the artifact.
    pub sha256: String,
    /// Artifact size in bytes.
    pub size: u64,
    /// When the artifact was stored.
    pub downloaded_at: DateTime<Utc>,
    /// Declared permissions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    /// Declared environment variable names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

/// A cached artifact and, when readable, its metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Path of the artifact bytes.
    pub artifact_path: PathBuf,
    /// Path of the sibling metadata file.
    pub metadata_path: PathBuf,
    /// Parsed metadata; `None` means unknown provenance.
    pub metadata: Option<CacheMetadata>,
}

impl CacheEntry {
    fn at(artifact_path: PathBuf) -> Self {
        let metadata_path = artifact_path.with_extension("json");
        let metadata = read_metadata(&metadata_path);
        Self {
            artifact_path,
            metadata_path,
            metadata,
        }
    }

    /// Cache key (`name@version`) taken from the file name.
    #[must_use]
    pub fn key(&self) -> String {
        self.artifact_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Plugin name part of the key.
    #[must_use]
    pub fn name(&self) -> String {
        let key = self.key();
        key.split_once('@')
            .map_or_else(|| key.clone(), |(name, _)| name.to_string())
    }

    /// Version part of the key.
    #[must_use]
    pub fn version(&self) -> Option<String> {
        self.key()
            .split_once('@')
            .map(|(_, version)| version.to_string())
    }

    /// Recorded content hash.
    #[must_use]
    pub fn content_hash(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.sha256.as_str())
    }

    /// Size of the artifact on disk.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        std::fs::metadata(&self.artifact_path).map_or(0, |m| m.len())
    }

    /// Declared environment variable names.
    #[must_use]
    pub fn declared_env(&self) -> &[String] {
        self.metadata
            .as_ref()
            .map_or(&[] as &[String], |m| m.env.as_slice())
    }

    /// Declared permissions.
    #[must_use]
    pub fn permissions(&self) -> Option<&Permissions> {
        self.metadata.as_ref().and_then(|m| m.permissions.as_ref())
    }
}

fn read_metadata(path: &Path) -> Option<CacheMetadata> {
    let data = std::fs::read(path).ok()?;
    match serde_json::from_slice(&data) {
        Ok(meta) => Some(meta),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable cache metadata");
            None
        },
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Content-addressed store of downloaded registry artifacts.
#[derive(Debug, Clone)]
pub struct IntegrityCache {
    root: PathBuf,
}

impl IntegrityCache {
    /// Cache rooted at `root` (normally `~/.mcper/cache`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache rooted in the mcper home directory.
    #[must_use]
    pub fn from_home(home: &mcper_core::McperHome) -> Self {
        Self::new(home.cache_dir())
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding plugin artifacts.
    #[must_use]
    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join("plugins")
    }

    /// Deterministic artifact path for `artifact`.
    #[must_use]
    pub fn artifact_path(&self, artifact: &RegistryArtifact) -> PathBuf {
        self.plugins_dir()
            .join(format!("{}.wasm", artifact.cache_key()))
    }

    /// Deterministic metadata path for `artifact`.
    #[must_use]
    pub fn metadata_path(&self, artifact: &RegistryArtifact) -> PathBuf {
        self.plugins_dir()
            .join(format!("{}.json", artifact.cache_key()))
    }

    /// Find the cached entry for `artifact`, if its bytes are on disk.
    ///
    /// Missing or unparsable metadata does not hide the entry; it is returned
    /// with `metadata: None`.
    #[must_use]
    pub fn lookup(&self, artifact: &RegistryArtifact) -> Option<CacheEntry> {
        let path = self.artifact_path(artifact);
        if !path.is_file() {
            debug!(artifact = %artifact.cache_key(), "cache miss");
            return None;
        }
        Some(CacheEntry::at(path))
    }

    /// Recompute the artifact hash and compare it with the metadata.
    ///
    /// Returns `false` on mismatch, missing metadata or an unreadable file.
    #[must_use]
    pub fn verify(&self, entry: &CacheEntry) -> bool {
        self.check(entry).is_ok()
    }

    /// Like [`verify`](Self::verify) but reports why an entry is invalid.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::IntegrityMismatch`] on a hash mismatch or
    /// missing metadata, or an I/O error if the artifact cannot be read.
    pub fn check(&self, entry: &CacheEntry) -> PluginResult<()> {
        self.read_verified(entry).map(drop)
    }

    /// Read the artifact bytes of `entry`, returning them only if they match
    /// the recorded hash. Reads the file once.
    ///
    /// # Errors
    ///
    /// Same as [`check`](Self::check).
    pub fn read_verified(&self, entry: &CacheEntry) -> PluginResult<Vec<u8>> {
        let key = entry.key();
        let (name, version) = key.split_once('@').unwrap_or((key.as_str(), ""));
        let Some(meta) = &entry.metadata else {
            return Err(PluginError::IntegrityMismatch {
                name: name.to_string(),
                version: version.to_string(),
                expected: "<no metadata>".to_string(),
                actual: String::new(),
            });
        };

        let bytes = std::fs::read(&entry.artifact_path)
            .map_err(|e| PluginError::io(&entry.artifact_path, e))?;
        let actual = Sha256::digest(&bytes);
        let expected = hex::decode(&meta.sha256).unwrap_or_default();

        if bool::from(actual.as_slice().ct_eq(&expected)) {
            Ok(bytes)
        } else {
            Err(PluginError::IntegrityMismatch {
                name: name.to_string(),
                version: version.to_string(),
                expected: meta.sha256.clone(),
                actual: hex::encode(actual),
            })
        }
    }

    /// Write `bytes` and their metadata for `artifact`.
    ///
    /// Both files go through a temporary file in the same directory and are
    /// renamed into place.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory or either file cannot be
    /// written.
    pub fn store(
        &self,
        artifact: &RegistryArtifact,
        bytes: &[u8],
        permissions: Option<&Permissions>,
        env: &[String],
    ) -> PluginResult<CacheEntry> {
        let dir = self.plugins_dir();
        std::fs::create_dir_all(&dir).map_err(|e| PluginError::io(&dir, e))?;

        let metadata = CacheMetadata {
            source: artifact.url.clone(),
            sha256: sha256_hex(bytes),
            size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            downloaded_at: Utc::now(),
            permissions: permissions.filter(|p| !p.is_empty()).cloned(),
            env: env.to_vec(),
        };
        let meta_json = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| PluginError::Serialization(e.to_string()))?;

        let artifact_path = self.artifact_path(artifact);
        let metadata_path = self.metadata_path(artifact);
        write_atomic(&dir, &artifact_path, bytes)?;
        write_atomic(&dir, &metadata_path, &meta_json)?;

        debug!(
            artifact = %artifact.cache_key(),
            size = metadata.size,
            sha256 = %metadata.sha256,
            "stored artifact in cache"
        );

        Ok(CacheEntry {
            artifact_path,
            metadata_path,
            metadata: Some(metadata),
        })
    }

    /// All cached artifacts, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugins directory exists but cannot be read.
    pub fn list(&self) -> PluginResult<Vec<CacheEntry>> {
        let dir = self.plugins_dir();
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PluginError::io(&dir, e)),
        };

        let mut entries: Vec<CacheEntry> = read_dir
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "wasm"))
            .map(CacheEntry::at)
            .collect();
        entries.sort_by_key(CacheEntry::key);
        Ok(entries)
    }

    /// Remove the whole cache root.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails for a reason other than absence.
    pub fn clean(&self) -> PluginResult<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PluginError::io(&self.root, e)),
        }
    }
}

fn write_atomic(dir: &Path, dest: &Path, bytes: &[u8]) -> PluginResult<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| PluginError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| PluginError::io(tmp.path(), e))?;
    tmp.persist(dest).map_err(|e| PluginError::io(dest, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str, version: &str) -> RegistryArtifact {
        RegistryArtifact {
            name: name.to_string(),
            version: version.to_string(),
            url: format!("https://example.com/{version}/plugin-{name}.wasm"),
        }
    }

    #[test]
    fn test_lookup_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IntegrityCache::new(dir.path());
        assert!(cache.lookup(&artifact("github", "v1")).is_none());
    }

    #[test]
    fn test_store_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IntegrityCache::new(dir.path());
        let a = artifact("github", "v1");
        let perms = Permissions {
            network: vec!["api.github.com".into()],
            filesystem: vec![],
        };

        let stored = cache
            .store(&a, b"\0asm module bytes", Some(&perms), &["GITHUB_TOKEN".into()])
            .unwrap();
        assert_eq!(stored.artifact_path, dir.path().join("plugins/github@v1.wasm"));
        assert_eq!(stored.metadata_path, dir.path().join("plugins/github@v1.json"));

        let entry = cache.lookup(&a).unwrap();
        assert!(cache.verify(&entry));
        assert_eq!(entry.declared_env(), ["GITHUB_TOKEN".to_string()]);
        assert_eq!(entry.permissions(), Some(&perms));
        assert_eq!(entry.size_bytes(), 17);
        assert_eq!(entry.name(), "github");
        assert_eq!(entry.version().as_deref(), Some("v1"));
        assert_eq!(entry.metadata.as_ref().unwrap().source, a.url);
    }

    #[test]
    fn test_tampered_artifact_fails_verify() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IntegrityCache::new(dir.path());
        let a = artifact("gmail", "latest");
        let entry = cache.store(&a, b"original", None, &[]).unwrap();
        assert_eq!(cache.read_verified(&entry).unwrap(), b"original");

        std::fs::write(&entry.artifact_path, b"tampered").unwrap();
        let entry = cache.lookup(&a).unwrap();
        assert!(!cache.verify(&entry));
        assert!(cache.read_verified(&entry).is_err());
        assert!(matches!(
            cache.check(&entry),
            Err(PluginError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_metadata_fails_verify() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IntegrityCache::new(dir.path());
        let a = artifact("hello", "v2");
        let entry = cache.store(&a, b"bytes", None, &[]).unwrap();
        std::fs::remove_file(&entry.metadata_path).unwrap();

        let entry = cache.lookup(&a).unwrap();
        assert!(entry.metadata.is_none());
        assert!(!cache.verify(&entry));
    }

    #[test]
    fn test_corrupt_metadata_is_unknown_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IntegrityCache::new(dir.path());
        let a = artifact("hello", "v3");
        let entry = cache.store(&a, b"bytes", None, &[]).unwrap();
        std::fs::write(&entry.metadata_path, b"{not json").unwrap();

        let entry = cache.lookup(&a).unwrap();
        assert!(entry.metadata.is_none());
        assert!(!cache.verify(&entry));
    }

    #[test]
    fn test_empty_permissions_are_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IntegrityCache::new(dir.path());
        let entry = cache
            .store(&artifact("x", "v1"), b"x", Some(&Permissions::default()), &[])
            .unwrap();
        let json = std::fs::read_to_string(&entry.metadata_path).unwrap();
        assert!(!json.contains("permissions"));
        assert!(json.contains("\"sha256\""));
    }

    #[test]
    fn test_list_and_clean() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IntegrityCache::new(dir.path().join("cache"));
        assert!(cache.list().unwrap().is_empty());

        cache.store(&artifact("zeta", "v1"), b"z", None, &[]).unwrap();
        cache.store(&artifact("alpha", "v1"), b"a", None, &[]).unwrap();

        let keys: Vec<_> = cache.list().unwrap().iter().map(CacheEntry::key).collect();
        assert_eq!(keys, vec!["alpha@v1", "zeta@v1"]);

        cache.clean().unwrap();
        assert!(!cache.root().exists());
        cache.clean().unwrap();
    }
}
