//! Serving the router with a graceful shutdown sequence.

use std::future::Future;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use tableside_core::error::AppError;

use crate::router::build_router;
use crate::state::AppState;

/// Upper bound on waiting for socket tasks after the engine shut down.
const SOCKET_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve HTTP and WebSocket traffic on `listener` until `signal` resolves.
///
/// On the signal the engine shuts down first (stop accepting, drain
/// broadcasts, close every socket with 1001); the HTTP server then stops and
/// the socket tasks are given a bounded window to flush their close frames.
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> Result<(), AppError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let engine = state.engine.clone();
    let sockets = state.sockets.clone();
    let app = build_router(state);

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Gateway listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            info!("Shutdown signal received, starting graceful shutdown");
            if let Err(e) = engine.shutdown().await {
                warn!(error = %e, "Engine shutdown reported an error");
            }
        })
        .await
        .map_err(|e| AppError::internal(format!("Server error: {e}")))?;

    sockets.close();
    if tokio::time::timeout(SOCKET_DRAIN_TIMEOUT, sockets.wait())
        .await
        .is_err()
    {
        warn!(remaining = sockets.len(), "Sockets still open after drain window");
    }

    info!("Gateway shut down gracefully");
    Ok(())
}
