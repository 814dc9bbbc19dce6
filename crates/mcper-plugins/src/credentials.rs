//! Cloud account credentials (`~/.mcper/credentials.json`).

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};

/// Default cloud service URL.
pub const DEFAULT_CLOUD_URL: &str = "https://api.mcper.com";

/// Credentials are treated as expired this long before `expires_at`.
const EXPIRY_MARGIN_MINUTES: i64 = 5;

/// Stored cloud credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// API key used as a bearer token.
    #[serde(default)]
    pub api_key: String,
    /// Account email.
    #[serde(default)]
    pub user_email: String,
    /// Account id.
    #[serde(default)]
    pub user_id: String,
    /// Cloud service base URL.
    #[serde(default)]
    pub cloud_url: String,
    /// Expiry. Absent or pre-epoch values mean no expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_email", &self.user_email)
            .field("cloud_url", &self.cloud_url)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Load credentials from `path`. A missing file yields `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> PluginResult<Option<Self>> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PluginError::io(path, e)),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| PluginError::Credentials(format!("failed to parse credentials: {e}")))
    }

    /// Write credentials to `path`, readable by the owner only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> PluginResult<()> {
        use std::io::Write;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PluginError::io(parent, e))?;
        }
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| PluginError::Serialization(e.to_string()))?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path).map_err(|e| PluginError::io(path, e))?;
        file.write_all(&data).map_err(|e| PluginError::io(path, e))
    }

    /// Delete the credentials file. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn delete(path: &Path) -> PluginResult<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PluginError::io(path, e)),
        }
    }

    /// Whether the key is present and not about to expire.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// [`is_valid`](Self::is_valid) evaluated at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.api_key.is_empty() {
            return false;
        }
        match self.expires_at {
            Some(expires) if expires.timestamp() > 0 => {
                let cutoff = now
                    .checked_add_signed(Duration::minutes(EXPIRY_MARGIN_MINUTES))
                    .unwrap_or(now);
                expires >= cutoff
            },
            _ => true,
        }
    }

    /// Cloud base URL, falling back to [`DEFAULT_CLOUD_URL`].
    #[must_use]
    pub fn cloud_url(&self) -> &str {
        if self.cloud_url.is_empty() {
            DEFAULT_CLOUD_URL
        } else {
            self.cloud_url.trim_end_matches('/')
        }
    }

    /// Upstream proxy URL handed to sandboxed modules.
    #[must_use]
    pub fn proxy_url(&self) -> String {
        format!("{}/proxy", self.cloud_url())
    }

    /// Cloud MCP endpoint.
    #[must_use]
    pub fn mcp_endpoint(&self) -> String {
        format!("{}/mcp", self.cloud_url())
    }

    /// Remote server discovery endpoint.
    #[must_use]
    pub fn servers_url(&self) -> String {
        format!("{}/api/v1/servers", self.cloud_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(expires_at: Option<DateTime<Utc>>) -> Credentials {
        Credentials {
            api_key: "mk_test".into(),
            user_email: "dev@example.com".into(),
            user_id: "u1".into(),
            cloud_url: "https://cloud.example.com/".into(),
            expires_at,
        }
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        assert!(creds(None).is_valid_at(now));
        assert!(creds(Some(now + Duration::hours(1))).is_valid_at(now));
        assert!(!creds(Some(now + Duration::minutes(2))).is_valid_at(now));
        assert!(!creds(Some(now - Duration::hours(1))).is_valid_at(now));

        let mut empty = creds(None);
        empty.api_key.clear();
        assert!(!empty.is_valid_at(now));
    }

    #[test]
    fn test_zero_time_means_no_expiry() {
        let c: Credentials = serde_json::from_str(
            r#"{"api_key":"k","user_email":"","user_id":"","cloud_url":"","expires_at":"0001-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(c.is_valid());
        assert_eq!(c.cloud_url(), DEFAULT_CLOUD_URL);
    }

    #[test]
    fn test_derived_urls() {
        let c = creds(None);
        assert_eq!(c.proxy_url(), "https://cloud.example.com/proxy");
        assert_eq!(c.mcp_endpoint(), "https://cloud.example.com/mcp");
        assert_eq!(c.servers_url(), "https://cloud.example.com/api/v1/servers");
    }

    #[test]
    fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        assert!(Credentials::load(&path).unwrap().is_none());

        let c = creds(None);
        c.save(&path).unwrap();
        assert_eq!(Credentials::load(&path).unwrap(), Some(c));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        assert!(Credentials::delete(&path).unwrap());
        assert!(!Credentials::delete(&path).unwrap());
    }

    #[test]
    fn test_debug_hides_key() {
        let rendered = format!("{:?}", creds(None));
        assert!(!rendered.contains("mk_test"));
    }
}
