//! Application state shared across all handlers.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::task::TaskTracker;

use tableside_core::config::AppConfig;
use tableside_realtime::RealtimeEngine;

/// Shared application state, cloned into every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Real-time engine.
    pub engine: Arc<RealtimeEngine>,
    /// Upgraded socket tasks, awaited during shutdown so close frames flush.
    pub sockets: TaskTracker,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl AppState {
    /// Create state around a running engine.
    pub fn new(config: Arc<AppConfig>, engine: Arc<RealtimeEngine>) -> Self {
        Self {
            config,
            engine,
            sockets: TaskTracker::new(),
            started_at: Instant::now(),
        }
    }
}
