//! Bridge messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A command sent by either side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    /// Correlation id, echoed in the response.
    pub id: String,
    /// Command name (`navigate`, `click`, ...).
    pub command: String,
    /// Command parameters.
    #[serde(default)]
    pub params: Value,
}

impl BridgeRequest {
    /// Request with a fresh random id.
    #[must_use]
    pub fn new(command: impl Into<String>, params: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            command: command.into(),
            params,
        }
    }
}

/// The answer to a [`BridgeRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    /// Id of the request being answered.
    pub id: String,
    /// Whether the command succeeded.
    pub success: bool,
    /// Result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeResponse {
    /// Successful response.
    #[must_use]
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response.
    #[must_use]
    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Anything that can arrive on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BridgeFrame {
    /// A command pushed by the peer.
    Request(BridgeRequest),
    /// An answer to one of our commands.
    Response(BridgeResponse),
}
