//! Observer HTTP server lifecycle.
//!
//! [`start_server`] binds and serves in the current task; the engine uses
//! [`spawn_observer`], which binds eagerly so a busy port is reported
//! before the loop starts, then serves on a background task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};
use trapline_core::config::ObserverConfig;

use crate::router::build_router;
use crate::state::AppState;

/// Errors that can occur when starting or running the observer server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}

async fn bind(config: &ObserverConfig) -> Result<TcpListener, ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))?;
    TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))
}

async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), ServerError> {
    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| ServerError::Serve(format!("serve error: {e}")))
}

/// Bind to the configured address and serve until the process ends.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server hits a
/// fatal I/O error.
pub async fn start_server(config: &ObserverConfig, state: Arc<AppState>) -> Result<(), ServerError> {
    let listener = bind(config).await?;
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "observer server listening");
    }
    serve(listener, state).await
}

/// Bind now and serve on a background task.
///
/// Returns the bound address (useful with port 0) and the task handle.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or taken.
pub async fn spawn_observer(
    config: &ObserverConfig,
    state: Arc<AppState>,
) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
    let listener = bind(config).await?;
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("no local address: {e}")))?;

    let handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, state).await {
            error!(error = %e, "observer server exited with error");
        }
    });

    info!(%addr, "observer server spawned on background task");
    Ok((addr, handle))
}
