//! Directory layout for mcper global state and per-project configuration.
//!
//! # Layout
//!
//! ```text
//! ~/.mcper/                       (McperHome)
//! ├── cache/
//! │   └── plugins/                  (name@version.wasm + name@version.json)
//! ├── logs/                         (serve / bridge log files)
//! └── credentials.json              (cloud credentials, 0600)
//!
//! <project>/.mcper/
//! └── config.toml                   (plugins aggregated by `mcper serve`)
//! ```

use std::io;
use std::path::{Path, PathBuf};

/// Name of the per-project configuration directory.
pub const PROJECT_DIR_NAME: &str = ".mcper";

/// Name of the per-project configuration file inside [`PROJECT_DIR_NAME`].
pub const PROJECT_CONFIG_FILE: &str = "config.toml";

/// Global mcper home directory (`~/.mcper/` or `$MCPER_HOME`).
#[derive(Debug, Clone)]
pub struct McperHome {
    root: PathBuf,
}

impl McperHome {
    /// Resolve the home directory.
    ///
    /// Checks `$MCPER_HOME` first, then falls back to `<home>/.mcper/`.
    ///
    /// # Errors
    ///
    /// Returns an error if `$MCPER_HOME` is not absolute or no home directory
    /// can be determined for the current user.
    pub fn resolve() -> io::Result<Self> {
        if let Ok(custom) = std::env::var("MCPER_HOME") {
            let root = PathBuf::from(&custom);
            if !root.is_absolute() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "MCPER_HOME must be an absolute path",
                ));
            }
            return Ok(Self { root });
        }

        let base = directories::BaseDirs::new().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "neither MCPER_HOME nor a user home directory is available",
            )
        })?;

        Ok(Self {
            root: base.home_dir().join(".mcper"),
        })
    }

    /// Create from an explicit path (useful for testing).
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the cache and log directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.plugins_cache_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    /// Root directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Artifact cache root (`~/.mcper/cache/`).
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Directory holding cached plugin artifacts (`~/.mcper/cache/plugins/`).
    #[must_use]
    pub fn plugins_cache_dir(&self) -> PathBuf {
        self.cache_dir().join("plugins")
    }

    /// Logs directory (`~/.mcper/logs/`).
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Path to the cloud credentials file.
    #[must_use]
    pub fn credentials_path(&self) -> PathBuf {
        self.root.join("credentials.json")
    }
}

/// Path of the project configuration file under `project_root`.
#[must_use]
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root
        .join(PROJECT_DIR_NAME)
        .join(PROJECT_CONFIG_FILE)
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate `MCPER_HOME`.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_resolve_with_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        // SAFETY: serialized by ENV_MUTEX
        unsafe { std::env::set_var("MCPER_HOME", &path) };
        let home = McperHome::resolve().unwrap();
        assert_eq!(home.root(), path);
        unsafe { std::env::remove_var("MCPER_HOME") };
    }

    #[test]
    fn test_resolve_rejects_relative_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        // SAFETY: serialized by ENV_MUTEX
        unsafe { std::env::set_var("MCPER_HOME", "relative/path") };
        let err = McperHome::resolve().unwrap_err();
        assert!(err.to_string().contains("absolute"), "got: {err}");
        unsafe { std::env::remove_var("MCPER_HOME") };
    }

    #[test]
    fn test_layout() {
        let home = McperHome::from_path("/tmp/mcper-home");
        assert_eq!(
            home.plugins_cache_dir(),
            PathBuf::from("/tmp/mcper-home/cache/plugins")
        );
        assert_eq!(
            home.credentials_path(),
            PathBuf::from("/tmp/mcper-home/credentials.json")
        );
        assert_eq!(
            project_config_path(Path::new("/work")),
            PathBuf::from("/work/.mcper/config.toml")
        );
    }

    #[test]
    fn test_ensure_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let home = McperHome::from_path(dir.path());
        home.ensure().unwrap();

        assert!(home.plugins_cache_dir().is_dir());
        assert!(home.logs_dir().is_dir());
    }
}
