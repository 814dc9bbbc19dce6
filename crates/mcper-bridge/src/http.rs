//! HTTP façade over a [`BridgeConnection`] for callers that cannot speak the
//! framed protocol.
//!
//! | Route | Command |
//! |---|---|
//! | `POST /command` `{command, params}` | any |
//! | `/navigate`, `/click`, `/type`, `/screenshot`, `/evaluate`, `/scroll`, `/wait`, `/ping` | same name |
//! | `/html`, `/text` | `get_html`, `get_text` |
//! | `/tabs`, `/tabs/new`, `/tabs/close` | `list_tabs`, `new_tab`, `close_tab` |
//!
//! Convenience routes accept GET (query parameters become the params
//! object) and POST (JSON body).

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::BridgeConnection;
use crate::error::{BridgeError, BridgeResult};

/// Default façade port.
pub const DEFAULT_PORT: u16 = 9223;

const COMMAND_ROUTES: [(&str, &str); 13] = [
    ("/navigate", "navigate"),
    ("/click", "click"),
    ("/type", "type"),
    ("/screenshot", "screenshot"),
    ("/html", "get_html"),
    ("/text", "get_text"),
    ("/evaluate", "evaluate"),
    ("/tabs", "list_tabs"),
    ("/tabs/new", "new_tab"),
    ("/tabs/close", "close_tab"),
    ("/scroll", "scroll"),
    ("/wait", "wait"),
    ("/ping", "ping"),
];

type BridgeState = Arc<BridgeConnection>;

#[derive(Debug, Deserialize)]
struct CommandBody {
    #[serde(default)]
    command: String,
    #[serde(default)]
    params: Value,
}

/// Build the façade router.
pub fn router(connection: BridgeState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/command", post(command));

    for (path, command) in COMMAND_ROUTES {
        router = router.route(
            path,
            get(
                move |State(conn): State<BridgeState>,
                      Query(query): Query<HashMap<String, String>>| {
                    let params = query
                        .into_iter()
                        .map(|(k, v)| (k, Value::String(v)))
                        .collect::<Map<_, _>>();
                    forward(conn, command, Value::Object(params))
                },
            )
            .post(move |State(conn): State<BridgeState>, body: Bytes| async move {
                match parse_params(&body) {
                    Ok(params) => forward(conn, command, params).await,
                    Err(response) => response,
                }
            }),
        );
    }

    router.with_state(connection)
}

/// Serve the façade on `listener` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an I/O error if the server fails.
pub async fn serve(
    listener: TcpListener,
    connection: BridgeState,
    shutdown: CancellationToken,
) -> BridgeResult<()> {
    info!(addr = ?listener.local_addr().ok(), "bridge HTTP façade listening");
    axum::serve(listener, router(connection))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("bridge HTTP façade stopped");
    Ok(())
}

async fn health(State(conn): State<BridgeState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connected": !conn.is_closed(),
        "pending": conn.pending(),
    }))
}

async fn command(State(conn): State<BridgeState>, body: Bytes) -> Response {
    let Ok(request) = serde_json::from_slice::<CommandBody>(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid request body");
    };
    if request.command.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "command is required");
    }
    forward(conn, &request.command, request.params).await
}

async fn forward(conn: BridgeState, command: &str, params: Value) -> Response {
    debug!(command = %command, "forwarding façade request");
    match conn.send(command, params).await {
        Ok(result) => success_response(result),
        Err(e) => error_response(status_for(&e), &e.to_string()),
    }
}

fn parse_params(body: &[u8]) -> Result<Value, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid params"))
}

fn status_for(error: &BridgeError) -> StatusCode {
    match error {
        BridgeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        BridgeError::ConnectionClosed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn success_response(result: Value) -> Response {
    let body = match result {
        Value::Object(mut map) => {
            map.insert("success".to_string(), Value::Bool(true));
            Value::Object(map)
        },
        other => json!({"success": true, "result": other}),
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DEFAULT_MAX_FRAME, read_message, write_message};
    use crate::message::{BridgeFrame, BridgeResponse};
    use std::time::Duration;

    /// Peer that echoes params for most commands, fails `click` and never
    /// answers `wait`.
    fn spawn_peer(stream: tokio::io::DuplexStream) {
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(stream);
            while let Ok(Some(frame)) = read_message::<_, BridgeFrame>(&mut reader, DEFAULT_MAX_FRAME).await {
                let BridgeFrame::Request(request) = frame else {
                    continue;
                };
                let response = match request.command.as_str() {
                    "wait" => continue,
                    "click" => BridgeResponse::failed(request.id, "element not found"),
                    "get_text" => BridgeResponse::ok(request.id, json!("plain")),
                    _ => BridgeResponse::ok(
                        request.id,
                        json!({"command": request.command, "params": request.params}),
                    ),
                };
                if write_message(&mut writer, &response, DEFAULT_MAX_FRAME)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    async fn start(peer: bool) -> (String, CancellationToken) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        if peer {
            spawn_peer(theirs);
        } else {
            drop(theirs);
        }
        let (r, w) = tokio::io::split(ours);
        let conn = Arc::new(
            BridgeConnection::builder()
                .timeout(Duration::from_millis(100))
                .spawn(r, w),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, conn, shutdown.clone()));
        (format!("http://{addr}"), shutdown)
    }

    #[tokio::test]
    async fn test_get_route_maps_query_to_params() {
        let (base, shutdown) = start(true).await;
        let body: Value = reqwest::get(format!("{base}/navigate?url=https://example.com"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["command"], "navigate");
        assert_eq!(body["params"], json!({"url": "https://example.com"}));

        let body: Value = reqwest::get(format!("{base}/text"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, json!({"success": true, "result": "plain"}));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_post_routes() {
        let (base, shutdown) = start(true).await;
        let client = reqwest::Client::new();

        let body: Value = client
            .post(format!("{base}/tabs/new"))
            .body(r#"{"url": "about:blank"}"#)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["command"], "new_tab");

        let body: Value = client
            .post(format!("{base}/command"))
            .body(r#"{"command": "scroll", "params": {"y": 200}}"#)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["params"], json!({"y": 200}));

        let response = client
            .post(format!("{base}/command"))
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (base, shutdown) = start(true).await;
        let client = reqwest::Client::new();

        let failed = client.post(format!("{base}/click")).send().await.unwrap();
        assert_eq!(failed.status(), reqwest::StatusCode::BAD_GATEWAY);
        let body: Value = failed.json().await.unwrap();
        assert_eq!(body["error"], "element not found");

        let timed_out = client.get(format!("{base}/wait")).send().await.unwrap();
        assert_eq!(timed_out.status(), reqwest::StatusCode::GATEWAY_TIMEOUT);
        shutdown.cancel();

        let (base, shutdown) = start(false).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let health: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["connected"], false);
        let closed = reqwest::get(format!("{base}/ping")).await.unwrap();
        assert_eq!(closed.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        shutdown.cancel();
    }
}
