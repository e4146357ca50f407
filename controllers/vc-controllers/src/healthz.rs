//! Liveness endpoint.

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Span};

use crate::error::ControllerError;

/// Router serving `GET /healthz`.
pub fn router() -> Router {
    Router::new().route("/healthz", get(|| async { "ok" }))
}

/// Binds the health endpoint and serves it until `cancel` fires.
///
/// Binding happens before this returns so a busy address fails startup.
pub async fn start(
    address: SocketAddr,
    cancel: CancellationToken,
    span: Span,
) -> Result<JoinHandle<()>, ControllerError> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|source| ControllerError::Healthz {
            address: address.to_string(),
            source,
        })?;
    let local = listener.local_addr().unwrap_or(address);
    info!(parent: &span, %local, "Healthz listening");

    Ok(tokio::spawn(async move {
        let server = axum::serve(listener, router())
            .with_graceful_shutdown(cancel.cancelled_owned());
        if let Err(e) = server.await {
            error!(parent: &span, error = %e, "Healthz server failed");
        }
    }))
}
