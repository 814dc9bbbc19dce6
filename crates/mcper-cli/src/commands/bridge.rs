//! `mcper bridge` - framed commands on stdin/stdout, HTTP on a local port.

use std::sync::Arc;

use anyhow::Context;
use mcper_bridge::{BridgeConnection, PingHandler, http};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run until the automation peer disconnects or the process is interrupted.
pub(crate) async fn run_bridge(port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;

    let connection = Arc::new(
        BridgeConnection::builder()
            .handler(Arc::new(PingHandler))
            .spawn(tokio::io::stdin(), tokio::io::stdout()),
    );

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(http::serve(
        listener,
        Arc::clone(&connection),
        shutdown.clone(),
    ));

    tokio::select! {
        () = connection.closed() => info!("automation peer disconnected"),
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
    }

    shutdown.cancel();
    server.await.context("HTTP façade task failed")??;
    Ok(())
}
