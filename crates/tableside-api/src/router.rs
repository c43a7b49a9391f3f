//! Route definitions for the gateway's HTTP surface.

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete Axum router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(ws_routes())
        .route("/health", get(handlers::health::health))
        .route("/metrics", get(handlers::metrics::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// One WebSocket endpoint per client kind.
fn ws_routes() -> Router<AppState> {
    Router::new()
        .route("/ws/waiter", get(handlers::ws::waiter_ws))
        .route("/ws/kitchen", get(handlers::ws::kitchen_ws))
        .route("/ws/admin", get(handlers::ws::admin_ws))
        .route("/ws/diner", get(handlers::ws::diner_ws))
}
