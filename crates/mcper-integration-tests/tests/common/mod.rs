//! Shared fixtures for the end-to-end tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use mcper_aggregator::{AggregatorSettings, BackendKind, BackendSession};
use mcper_core::McperHome;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ErrorData, JsonObject, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ServerHandler, ServiceExt};
use tokio::task::JoinHandle;

/// Exits with code 3 without touching stdin.
#[allow(dead_code)]
pub const EXIT_3_WAT: &str = r#"
    (module
      (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
      (memory (export "memory") 1)
      (func (export "_start") (call $proc_exit (i32.const 3))))
"#;

/// Reads one chunk of stdin (the client's first request), then exits with
/// code 3 without answering.
#[allow(dead_code)]
pub const READ_THEN_EXIT_WAT: &str = r#"
    (module
      (import "wasi_snapshot_preview1" "fd_read"
        (func $fd_read (param i32 i32 i32 i32) (result i32)))
      (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
      (memory (export "memory") 1)
      (func (export "_start")
        (i32.store (i32.const 0) (i32.const 64))
        (i32.store (i32.const 4) (i32.const 1024))
        (drop (call $fd_read (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 16)))
        (call $proc_exit (i32.const 3))))
"#;

/// Answers `initialize` (id 0) and `tools/list` (id 1) with fixed lines,
/// counting newline-terminated messages on stdin. The fourth message, the
/// first `tools/call`, makes it exit with code 3 without answering.
#[allow(dead_code)]
pub const EXIT_ON_CALL_WAT: &str = r#"
    (module
      (import "wasi_snapshot_preview1" "fd_read"
        (func $fd_read (param i32 i32 i32 i32) (result i32)))
      (import "wasi_snapshot_preview1" "fd_write"
        (func $fd_write (param i32 i32 i32 i32) (result i32)))
      (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
      (memory (export "memory") 1)
      (data (i32.const 8192) "{\"jsonrpc\":\"2.0\",\"id\":0,\"result\":{\"protocolVersion\":\"2025-03-26\",\"capabilities\":{\"tools\":{}},\"serverInfo\":{\"name\":\"quitter\",\"version\":\"1.0.0\"}}}\0a")
      (data (i32.const 12288) "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"tools\":[{\"name\":\"work\",\"inputSchema\":{\"type\":\"object\"}}]}}\0a")
      (func $reply (param $ptr i32) (param $len i32)
        (i32.store (i32.const 32) (local.get $ptr))
        (i32.store (i32.const 36) (local.get $len))
        (drop (call $fd_write (i32.const 1) (i32.const 32) (i32.const 1) (i32.const 48))))
      (func (export "_start")
        (local $n i32)
        (local $i i32)
        (local $lines i32)
        (loop $read
          (i32.store (i32.const 0) (i32.const 1024))
          (i32.store (i32.const 4) (i32.const 4096))
          (if (call $fd_read (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 16))
            (then (call $proc_exit (i32.const 1))))
          (local.set $n (i32.load (i32.const 16)))
          (if (i32.eqz (local.get $n))
            (then (call $proc_exit (i32.const 0))))
          (local.set $i (i32.const 0))
          (block $scanned
            (loop $scan
              (br_if $scanned (i32.ge_u (local.get $i) (local.get $n)))
              (if (i32.eq (i32.load8_u (i32.add (i32.const 1024) (local.get $i))) (i32.const 10))
                (then
                  (local.set $lines (i32.add (local.get $lines) (i32.const 1)))
                  (if (i32.eq (local.get $lines) (i32.const 1))
                    (then (call $reply (i32.const 8192) (i32.const 145))))
                  (if (i32.eq (local.get $lines) (i32.const 3))
                    (then (call $reply (i32.const 12288) (i32.const 94))))
                  (if (i32.eq (local.get $lines) (i32.const 4))
                    (then (call $proc_exit (i32.const 3))))))
              (local.set $i (i32.add (local.get $i) (i32.const 1)))
              (br $scan)))
          (br $read))))
"#;

/// Settings rooted in `dir` with no built-in tools and short timeouts.
#[allow(dead_code)]
pub fn settings(dir: &Path, registry_base: &str) -> AggregatorSettings {
    AggregatorSettings::new(&McperHome::from_path(dir), dir)
        .with_registry_base(registry_base)
        .without_native_tools()
        .with_call_timeout(Duration::from_secs(60))
        .with_shutdown_timeout(Duration::from_secs(1))
}

/// Backend exposing `echo` (returns its arguments as JSON text) and `hang`
/// (never answers). Every call is recorded.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct EchoServer {
    pub calls: Arc<Mutex<Vec<(String, Option<JsonObject>)>>>,
}

impl ServerHandler for EchoServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..ServerInfo::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let schema = serde_json::json!({"type": "object"});
        let schema = Arc::new(schema.as_object().cloned().unwrap_or_default());
        Ok(ListToolsResult::with_all_items(vec![
            Tool::new("echo", "Return the arguments", Arc::clone(&schema)),
            Tool::new("hang", "Never return", schema),
        ]))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.calls
            .lock()
            .unwrap()
            .push((request.name.to_string(), request.arguments.clone()));
        if request.name == "hang" {
            std::future::pending::<()>().await;
        }
        let text = serde_json::to_string(&request.arguments).unwrap_or_default();
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

/// Connect a [`BackendSession`] to an in-memory [`EchoServer`]. Aborting the
/// returned task kills the backend.
#[allow(dead_code)]
pub async fn echo_session(
    kind: BackendKind,
    instance: &str,
) -> (BackendSession, EchoServer, JoinHandle<()>) {
    let server = EchoServer::default();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let handler = server.clone();
    let task = tokio::spawn(async move {
        let (reader, writer) = tokio::io::split(server_io);
        if let Ok(service) = handler.serve((reader, writer)).await {
            let _ = service.waiting().await;
        }
    });
    let (reader, writer) = tokio::io::split(client_io);
    let session = BackendSession::connect(kind, instance, reader, writer)
        .await
        .unwrap();
    (session, server, task)
}

/// Registry stand-in that serves the same bytes for every path and counts
/// requests.
#[allow(dead_code)]
pub struct ArtifactServer {
    pub base: String,
    hits: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ArtifactServer {
    pub async fn start(body: &'static [u8]) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().fallback(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (StatusCode::OK, body)
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            base: format!("http://{addr}/registry"),
            hits,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}
