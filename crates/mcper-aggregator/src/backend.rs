//! MCP client sessions to backends.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use mcper_sandbox::{SessionExit, SessionMonitor};
use rmcp::ServiceExt;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, ClientCapabilities, ClientInfo, Implementation,
    JsonObject, ProtocolVersion, Tool,
};
use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{AggregatorError, AggregatorResult};

/// How long a failed handshake or call waits for a dying module to report
/// its exit status.
pub(crate) const EXIT_REPORT_GRACE: Duration = Duration::from_millis(500);

/// Category of backend; the first segment of every namespaced tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Sandboxed module (local file or registry artifact).
    Wasm,
    /// Cloud-hosted server reached with the account's bearer token.
    Cloud,
    /// MCP server reached directly over HTTP.
    Http,
}

impl BackendKind {
    /// Namespace prefix.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wasm => "wasm",
            Self::Cloud => "cloud",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-side handler presented to every backend.
#[derive(Debug, Clone)]
pub struct AggregatorClient {
    instance: String,
}

impl AggregatorClient {
    fn new(instance: &str) -> Self {
        Self {
            instance: instance.to_string(),
        }
    }
}

impl rmcp::ClientHandler for AggregatorClient {
    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            meta: None,
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: format!("{}-{}", mcper_core::SERVER_NAME, self.instance),
                title: None,
                version: mcper_core::VERSION.to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
        }
    }
}

type BackendService = RunningService<RoleClient, AggregatorClient>;

/// An open MCP session to one backend.
pub struct BackendSession {
    kind: BackendKind,
    instance: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<BackendService>>,
    monitor: Option<SessionMonitor>,
}

impl BackendSession {
    /// Handshake over a byte-stream pair (sandbox pipes, sockets or
    /// in-memory duplex streams).
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::Session`] if the handshake fails or the
    /// peer closes the stream first.
    pub async fn connect<R, W>(
        kind: BackendKind,
        instance: &str,
        reader: R,
        writer: W,
    ) -> AggregatorResult<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let service = AggregatorClient::new(instance)
            .serve((reader, writer))
            .await
            .map_err(|e| AggregatorError::Session {
                instance: instance.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::from_service(kind, instance, service))
    }

    /// Handshake with a streamable-HTTP MCP server, optionally sending a
    /// bearer token with every request.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::Session`] if the server is unreachable or
    /// the handshake fails.
    pub async fn connect_http(
        kind: BackendKind,
        instance: &str,
        url: &str,
        bearer: Option<&str>,
    ) -> AggregatorResult<Self> {
        let mut config = StreamableHttpClientTransportConfig::with_uri(url.to_string());
        if let Some(token) = bearer {
            config = config.auth_header(token.to_string());
        }
        let transport = StreamableHttpClientTransport::from_config(config);

        let service = AggregatorClient::new(instance)
            .serve(transport)
            .await
            .map_err(|e| AggregatorError::Session {
                instance: instance.to_string(),
                reason: format!("failed to connect to {url}: {e}"),
            })?;
        Ok(Self::from_service(kind, instance, service))
    }

    fn from_service(kind: BackendKind, instance: &str, service: BackendService) -> Self {
        let peer = service.peer().clone();
        info!(
            kind = %kind,
            instance = %instance,
            server = ?service.peer_info().map(|i| i.server_info.name.clone()),
            "backend session established"
        );
        Self {
            kind,
            instance: instance.to_string(),
            peer,
            service: Mutex::new(Some(service)),
            monitor: None,
        }
    }

    /// Attach the completion monitor of the sandboxed module behind this
    /// session.
    #[must_use]
    pub fn with_monitor(mut self, monitor: SessionMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Backend category.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Instance name used in namespaces.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Exit status of the sandboxed module, once it has finished.
    #[must_use]
    pub fn module_exit(&self) -> Option<SessionExit> {
        self.monitor.as_ref().and_then(SessionMonitor::exit)
    }

    async fn await_module_exit(&self) -> Option<SessionExit> {
        let mut monitor = self.monitor.clone()?;
        tokio::time::timeout(EXIT_REPORT_GRACE, monitor.wait())
            .await
            .ok()
    }

    /// Whether the transport has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.peer.is_transport_closed()
    }

    /// Fetch the backend's full tool catalog.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::Session`] if the request fails.
    pub async fn list_tools(&self) -> AggregatorResult<Vec<Tool>> {
        self.peer
            .list_all_tools()
            .await
            .map_err(|e| self.session_error(e))
    }

    /// Invoke `tool` (the backend's own name) with `arguments`, bounded by
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::Timeout`] when the limit elapses, or
    /// [`AggregatorError::ToolCall`] when the request fails. A result the
    /// backend marks as an error is returned as `Ok`.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Option<JsonObject>,
        timeout: Duration,
    ) -> AggregatorResult<CallToolResult> {
        let params = CallToolRequestParams {
            meta: None,
            name: Cow::Owned(tool.to_string()),
            arguments,
            task: None,
        };

        debug!(instance = %self.instance, tool = %tool, "forwarding tool call");
        match tokio::time::timeout(timeout, self.peer.call_tool(params)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                let mut reason = e.to_string();
                let exit = if matches!(e, rmcp::service::ServiceError::McpError(_)) {
                    self.module_exit()
                } else {
                    self.await_module_exit().await
                };
                if let Some(exit) = exit {
                    reason = format!("{reason} (module {exit})");
                }
                Err(AggregatorError::ToolCall(reason))
            },
            Err(_) => Err(AggregatorError::Timeout {
                operation: format!("call to {}/{}/{tool}", self.kind, self.instance),
                limit: timeout,
            }),
        }
    }

    /// Close the session, waiting up to `timeout` for a clean shutdown.
    pub async fn close(&self, timeout: Duration) {
        let Some(mut service) = self.service.lock().await.take() else {
            return;
        };
        match service.close_with_timeout(timeout).await {
            Ok(Some(reason)) => {
                info!(instance = %self.instance, ?reason, "backend session closed");
            },
            Ok(None) => {
                warn!(instance = %self.instance, "backend session close timed out; dropping");
            },
            Err(e) => {
                error!(instance = %self.instance, error = %e, "backend session close failed");
            },
        }
    }

    fn session_error(&self, e: impl fmt::Display) -> AggregatorError {
        AggregatorError::Session {
            instance: self.instance.clone(),
            reason: e.to_string(),
        }
    }
}

impl fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSession")
            .field("kind", &self.kind)
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}
