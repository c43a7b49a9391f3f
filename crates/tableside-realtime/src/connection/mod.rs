//! Connection state: handles, scope locks, the registry, liveness and rate limiting.

pub mod handle;
pub mod heartbeat;
pub mod lock;
pub mod rate_limit;
pub mod registry;

pub use handle::{ConnectionHandle, ConnectionIdentity, ConnectionScopes};
pub use heartbeat::HeartbeatTracker;
pub use lock::{LockManager, LockScope, ScopeGuard};
pub use rate_limit::RateLimiter;
pub use registry::ConnectionRegistry;
