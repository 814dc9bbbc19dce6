//! Request/response correlation over one framed duplex stream.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{self, DEFAULT_MAX_FRAME};
use crate::error::{BridgeError, BridgeResult};
use crate::message::{BridgeFrame, BridgeRequest, BridgeResponse};

/// Default limit for one command round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Answers commands the peer pushes to us.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle `command`. An `Err` is sent back as a failed response.
    async fn handle(&self, command: &str, params: Value) -> Result<Value, String>;
}

/// Answers `ping` and rejects everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn handle(&self, command: &str, _params: Value) -> Result<Value, String> {
        match command {
            "ping" => Ok(json!({"message": "pong"})),
            other => Err(format!("Unknown command: {other}")),
        }
    }
}

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Shared {
    writer: Mutex<BoxWriter>,
    pending: DashMap<String, oneshot::Sender<BridgeResponse>>,
    closed: CancellationToken,
    max_frame: usize,
}

impl Shared {
    /// Length and payload go out under one lock so frames never interleave.
    async fn send<T: Serialize>(&self, message: &T) -> BridgeResult<()> {
        let mut writer = self.writer.lock().await;
        codec::write_message(&mut *writer, message, self.max_frame).await
    }
}

/// Builder for [`BridgeConnection`].
#[must_use]
pub struct BridgeConnectionBuilder {
    timeout: Duration,
    max_frame: usize,
    handler: Arc<dyn CommandHandler>,
}

impl Default for BridgeConnectionBuilder {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_frame: DEFAULT_MAX_FRAME,
            handler: Arc::new(PingHandler),
        }
    }
}

impl BridgeConnectionBuilder {
    /// Round-trip limit for [`BridgeConnection::send`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Largest frame accepted or sent.
    pub fn max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Handler for commands the peer pushes.
    pub fn handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Start the reader task on `reader` and return the connection.
    pub fn spawn<R, W>(self, reader: R, writer: W) -> BridgeConnection
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            writer: Mutex::new(Box::new(writer)),
            pending: DashMap::new(),
            closed: CancellationToken::new(),
            max_frame: self.max_frame,
        });
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&shared), self.handler));
        BridgeConnection {
            shared,
            timeout: self.timeout,
            reader_task,
        }
    }
}

/// One side of the bridge: sends commands and waits for the matching
/// responses while dispatching the peer's own commands to a handler.
pub struct BridgeConnection {
    shared: Arc<Shared>,
    timeout: Duration,
    reader_task: JoinHandle<()>,
}

impl BridgeConnection {
    /// Configure a connection.
    pub fn builder() -> BridgeConnectionBuilder {
        BridgeConnectionBuilder::default()
    }

    /// Connection with the default timeout, frame limit and [`PingHandler`].
    pub fn spawn<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::builder().spawn(reader, writer)
    }

    /// Send `command` and return the result payload.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Command`] when the peer reports a failure, plus
    /// everything [`BridgeConnection::request`] returns.
    pub async fn send(&self, command: &str, params: Value) -> BridgeResult<Value> {
        let response = self.request(command, params).await?;
        if response.success {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            Err(BridgeError::Command(
                response
                    .error
                    .unwrap_or_else(|| format!("{command} failed")),
            ))
        }
    }

    /// Send `command` and return the raw response, bounded by the default
    /// timeout.
    ///
    /// # Errors
    ///
    /// See [`BridgeConnection::request_with_timeout`].
    pub async fn request(&self, command: &str, params: Value) -> BridgeResult<BridgeResponse> {
        self.request_with_timeout(command, params, self.timeout)
            .await
    }

    /// Send `command` and wait up to `timeout` for its response.
    ///
    /// A timeout forgets the request but leaves the connection usable.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Timeout`], [`BridgeError::ConnectionClosed`] if
    /// the peer is gone or leaves before answering, or a write error.
    pub async fn request_with_timeout(
        &self,
        command: &str,
        params: Value,
        timeout: Duration,
    ) -> BridgeResult<BridgeResponse> {
        let request = BridgeRequest::new(command, params);
        let id = request.id.clone();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id.clone(), tx);

        // Checked after inserting: the reader cancels before clearing.
        if self.shared.closed.is_cancelled() {
            self.shared.pending.remove(&id);
            return Err(BridgeError::ConnectionClosed);
        }

        debug!(id = %id, command = %command, "sending bridge command");
        if let Err(e) = self.shared.send(&request).await {
            self.shared.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(BridgeError::ConnectionClosed),
            Err(_) => {
                self.shared.pending.remove(&id);
                warn!(id = %id, command = %command, "bridge command timed out");
                Err(BridgeError::Timeout {
                    command: command.to_string(),
                    limit: timeout,
                })
            },
        }
    }

    /// Whether the peer has closed the stream.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Wait until the peer closes the stream.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    /// Number of commands awaiting a response.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.pending.len()
    }
}

impl Drop for BridgeConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

impl fmt::Debug for BridgeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConnection")
            .field("timeout", &self.timeout)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn read_loop<R>(mut reader: R, shared: Arc<Shared>, handler: Arc<dyn CommandHandler>)
where
    R: AsyncRead + Send + Unpin,
{
    loop {
        match codec::read_message::<_, BridgeFrame>(&mut reader, shared.max_frame).await {
            Ok(Some(BridgeFrame::Response(response))) => {
                match shared.pending.remove(&response.id) {
                    Some((_, tx)) => {
                        let _ = tx.send(response);
                    },
                    None => debug!(id = %response.id, "ignoring unmatched bridge response"),
                }
            },
            Ok(Some(BridgeFrame::Request(request))) => {
                let shared = Arc::clone(&shared);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    debug!(id = %request.id, command = %request.command, "handling peer command");
                    let response = match handler.handle(&request.command, request.params).await {
                        Ok(result) => BridgeResponse::ok(request.id, result),
                        Err(error) => BridgeResponse::failed(request.id, error),
                    };
                    if let Err(e) = shared.send(&response).await {
                        warn!(error = %e, "failed to answer peer command");
                    }
                });
            },
            Ok(None) => {
                info!("bridge peer closed the stream");
                break;
            },
            Err(e @ (BridgeError::FrameTooLarge { .. } | BridgeError::InvalidMessage(_))) => {
                warn!(error = %e, "dropping bridge frame");
            },
            Err(e) => {
                warn!(error = %e, "bridge stream failed");
                break;
            },
        }
    }

    shared.closed.cancel();
    shared.pending.clear();
}
