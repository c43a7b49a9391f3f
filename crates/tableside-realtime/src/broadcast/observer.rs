//! Broadcast observers.
//!
//! Observers are notified after every broadcast attempt. Metrics is the
//! built-in observer; others can be attached when the router is built.

use super::router::BroadcastReport;
use super::scope::BroadcastScope;

/// What was broadcast.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastContext<'a> {
    /// Target scope.
    pub scope: &'a BroadcastScope,
    /// Event type, when the payload is a domain event.
    pub event_type: Option<&'a str>,
}

/// Receives broadcast outcomes. Implementations must not block.
pub trait BroadcastObserver: Send + Sync + std::fmt::Debug {
    /// A broadcast completed (possibly with zero targets).
    fn on_broadcast(&self, report: &BroadcastReport, ctx: &BroadcastContext<'_>);

    /// A broadcast was refused by the router-wide rate limit.
    fn on_rate_limited(&self, _ctx: &BroadcastContext<'_>) {}
}
