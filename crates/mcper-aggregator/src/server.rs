//! The outward MCP server.

use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ErrorData, Implementation, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ServerHandler, ServiceExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::error::{AggregatorError, AggregatorResult};
use crate::router::Aggregator;

const INSTRUCTIONS: &str = "Tools are named {kind}/{instance}/{tool}. \
    Built-in tools under mcper/native/ describe the plugin registry, the \
    configured plugins and the local artifact cache.";

/// MCP server handler publishing the aggregated tool set.
#[derive(Debug, Clone)]
pub struct AggregatorServer {
    aggregator: Arc<Aggregator>,
}

impl AggregatorServer {
    /// Serve `aggregator`'s tools.
    #[must_use]
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }

    /// Serve over an arbitrary byte-stream pair until the client disconnects
    /// or shutdown begins.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::Session`] if the client handshake fails.
    pub async fn serve_io<R, W>(self, reader: R, writer: W) -> AggregatorResult<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shutdown = self.aggregator.shutdown_token();
        let service = self
            .serve((reader, writer))
            .await
            .map_err(|e| AggregatorError::Session {
                instance: "client".to_string(),
                reason: e.to_string(),
            })?;
        info!("MCP server running");

        tokio::select! {
            quit = service.waiting() => match quit {
                Ok(reason) => info!(?reason, "client disconnected"),
                Err(e) => warn!(error = %e, "server task failed"),
            },
            () = shutdown.cancelled() => info!("server stopped by shutdown"),
        }
        Ok(())
    }

    /// Serve over the process's stdin and stdout.
    ///
    /// # Errors
    ///
    /// See [`AggregatorServer::serve_io`].
    pub async fn serve_stdio(self) -> AggregatorResult<()> {
        let (stdin, stdout) = rmcp::transport::stdio();
        self.serve_io(stdin, stdout).await
    }
}

impl ServerHandler for AggregatorServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: mcper_core::SERVER_NAME.to_string(),
                title: None,
                version: mcper_core::VERSION.to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(INSTRUCTIONS.to_string()),
            ..ServerInfo::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(self.aggregator.tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        debug!(tool = %request.name, "tool call");
        match self
            .aggregator
            .call_tool(&request.name, request.arguments)
            .await
        {
            Ok(result) => Ok(result),
            Err(AggregatorError::UnknownTool(name)) => Err(ErrorData::invalid_params(
                format!("unknown tool: {name}"),
                None,
            )),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}
