//! # tableside-api
//!
//! HTTP layer for the Tableside gateway built on Axum.
//!
//! Exposes the four WebSocket endpoints (`/ws/waiter`, `/ws/kitchen`,
//! `/ws/admin`, `/ws/diner`), `/health` and `/metrics`, and bridges axum
//! sockets onto the real-time engine's endpoint sessions.

pub mod app;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use app::serve;
pub use error::ApiError;
pub use router::build_router;
pub use state::AppState;
