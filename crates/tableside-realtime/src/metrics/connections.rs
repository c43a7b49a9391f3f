//! Connection metrics helpers.

use std::sync::atomic::Ordering;

use super::GatewayMetrics;

/// Why a handshake was refused or a live connection closed by policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Credential missing, invalid, expired or revoked at handshake.
    Auth,
    /// Role or origin not allowed.
    Forbidden,
    /// Per-user or per-branch limit reached.
    Capacity,
    /// Sector lookup failed or timed out.
    Lookup,
    /// Gateway shutting down.
    Unavailable,
    /// Message rate exceeded.
    RateLimited,
    /// Frame larger than allowed.
    TooLarge,
    /// Credential no longer valid at revalidation.
    Revoked,
}

/// Record a new connection
pub fn record_connect(metrics: &GatewayMetrics) {
    metrics.connections_total.fetch_add(1, Ordering::Relaxed);
    metrics.connections_active.fetch_add(1, Ordering::Relaxed);
}

/// Record a disconnection
pub fn record_disconnect(metrics: &GatewayMetrics) {
    let _ = metrics
        .connections_active
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
}

/// Record a refused handshake or a policy close
pub fn record_reject(metrics: &GatewayMetrics, reason: RejectReason) {
    let counter = match reason {
        RejectReason::Auth => &metrics.rejected_auth,
        RejectReason::Forbidden => &metrics.rejected_forbidden,
        RejectReason::Capacity => &metrics.rejected_capacity,
        RejectReason::Lookup => &metrics.rejected_lookup,
        RejectReason::Unavailable => &metrics.rejected_unavailable,
        RejectReason::RateLimited => &metrics.closed_rate_limited,
        RejectReason::TooLarge => &metrics.closed_too_large,
        RejectReason::Revoked => &metrics.closed_revoked,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}
