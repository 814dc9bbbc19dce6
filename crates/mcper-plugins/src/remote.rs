//! Remote MCP servers registered to a cloud account.

use serde::{Deserialize, Serialize};

use crate::credentials::Credentials;
use crate::error::{PluginError, PluginResult};

/// A server the cloud account exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteServer {
    /// Display name.
    pub name: String,
    /// Server type as reported by the cloud.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Plugin source for the server.
    pub url: String,
}

/// List the account's remote servers.
///
/// # Errors
///
/// Returns an error on transport failure, a non-success status or an
/// unparsable body.
pub async fn fetch_remote_servers(
    client: &reqwest::Client,
    credentials: &Credentials,
) -> PluginResult<Vec<RemoteServer>> {
    let url = credentials.servers_url();
    let response = client
        .get(&url)
        .bearer_auth(&credentials.api_key)
        .send()
        .await
        .map_err(|e| PluginError::Http(format!("failed to fetch remote servers: {e}")))?;

    if !response.status().is_success() {
        return Err(PluginError::Http(format!(
            "failed to fetch remote servers: HTTP {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| PluginError::Serialization(format!("invalid remote server list: {e}")))
}
