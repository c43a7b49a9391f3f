//! Health check handler.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use tableside_realtime::bridge::CircuitState;

use crate::dto::response::{ApiResponse, HealthResponse};
use crate::state::AppState;

/// GET /health
///
/// Answers 503 once the gateway has begun shutting down so load balancers
/// stop routing new sockets here.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let engine = &state.engine;
    let gauges = engine.gauges();
    let breaker = engine.subscriber().breaker().state();
    let accepting = engine.is_accepting();

    let status = if !accepting {
        "shutting_down"
    } else if breaker != CircuitState::Closed || gauges.drop_rate_alert {
        "degraded"
    } else {
        "ok"
    };
    let code = if accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(ApiResponse::ok(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            connections: gauges.registry.connections,
            users: gauges.registry.users,
            breaker: breaker.as_str().to_string(),
            drop_rate_alert: gauges.drop_rate_alert,
        })),
    )
}
