//! # tableside-realtime
//!
//! Real-time fan-out engine for the Tableside gateway. Provides:
//!
//! - Sharded, canonically ordered scope locks with bounded lock caching
//! - The connection registry and its reverse indices (user, branch, sector, session)
//! - Heartbeat tracking with two-phase stale-connection eviction
//! - Per-connection sliding-window rate limiting
//! - Scope-filtered, batched broadcast delivery with pluggable observers
//! - Event bus subscription guarded by a circuit breaker with jittered retry
//! - The per-connection endpoint session lifecycle

pub mod bridge;
pub mod broadcast;
pub mod connection;
pub mod message;
pub mod metrics;
pub mod sector;
pub mod server;
pub mod session;

pub use broadcast::router::BroadcastRouter;
pub use connection::registry::ConnectionRegistry;
pub use server::{EngineDeps, RealtimeEngine};
pub use session::lifecycle::EndpointSession;
