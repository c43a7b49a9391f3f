//! Gateway metrics.
//!
//! Plain atomic counters, snapshotted for `/health` and rendered in the
//! Prometheus text format for `/metrics`.

pub mod broadcasts;
pub mod connections;
pub mod exposition;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

pub use connections::RejectReason;
pub use exposition::{EngineGauges, render_prometheus};

/// Gateway-level metrics counters.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Connections registered since startup
    pub connections_total: AtomicU64,
    /// Connections currently registered
    pub connections_active: AtomicU64,
    /// Handshakes rejected for a bad or missing credential
    pub rejected_auth: AtomicU64,
    /// Handshakes rejected for role or origin
    pub rejected_forbidden: AtomicU64,
    /// Handshakes rejected by a connection limit
    pub rejected_capacity: AtomicU64,
    /// Handshakes failed by the sector lookup
    pub rejected_lookup: AtomicU64,
    /// Handshakes refused during shutdown
    pub rejected_unavailable: AtomicU64,
    /// Connections closed for exceeding the message rate
    pub closed_rate_limited: AtomicU64,
    /// Connections closed for an oversized frame
    pub closed_too_large: AtomicU64,
    /// Connections closed when revalidation failed
    pub closed_revoked: AtomicU64,
    /// Connections evicted by the heartbeat sweep
    pub stale_evictions: AtomicU64,
    /// Client frames accepted
    pub messages_received: AtomicU64,
    /// Broadcasts completed
    pub broadcasts_total: AtomicU64,
    /// Broadcasts refused by the router rate limit
    pub broadcasts_rate_limited: AtomicU64,
    /// Per-connection deliveries queued
    pub deliveries_sent: AtomicU64,
    /// Per-connection deliveries failed
    pub deliveries_failed: AtomicU64,
    /// Payloads received from the bus
    pub events_received: AtomicU64,
    /// Payloads dropped by validation
    pub events_invalid: AtomicU64,
    /// Events that could not be routed
    pub events_route_failed: AtomicU64,
}

impl GatewayMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an accepted client frame
    pub fn inc_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a payload received from the bus
    pub fn inc_event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a payload dropped by validation
    pub fn inc_event_invalid(&self) {
        self.events_invalid.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an event routing failure
    pub fn inc_route_failed(&self) {
        self.events_route_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count stale evictions
    pub fn add_stale_evictions(&self, count: usize) {
        self.stale_evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            connections_total: load(&self.connections_total),
            connections_active: load(&self.connections_active),
            rejected_auth: load(&self.rejected_auth),
            rejected_forbidden: load(&self.rejected_forbidden),
            rejected_capacity: load(&self.rejected_capacity),
            rejected_lookup: load(&self.rejected_lookup),
            rejected_unavailable: load(&self.rejected_unavailable),
            closed_rate_limited: load(&self.closed_rate_limited),
            closed_too_large: load(&self.closed_too_large),
            closed_revoked: load(&self.closed_revoked),
            stale_evictions: load(&self.stale_evictions),
            messages_received: load(&self.messages_received),
            broadcasts_total: load(&self.broadcasts_total),
            broadcasts_rate_limited: load(&self.broadcasts_rate_limited),
            deliveries_sent: load(&self.deliveries_sent),
            deliveries_failed: load(&self.deliveries_failed),
            events_received: load(&self.events_received),
            events_invalid: load(&self.events_invalid),
            events_route_failed: load(&self.events_route_failed),
        }
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Connections registered since startup
    pub connections_total: u64,
    /// Connections currently registered
    pub connections_active: u64,
    /// Handshakes rejected for a bad or missing credential
    pub rejected_auth: u64,
    /// Handshakes rejected for role or origin
    pub rejected_forbidden: u64,
    /// Handshakes rejected by a connection limit
    pub rejected_capacity: u64,
    /// Handshakes failed by the sector lookup
    pub rejected_lookup: u64,
    /// Handshakes refused during shutdown
    pub rejected_unavailable: u64,
    /// Connections closed for exceeding the message rate
    pub closed_rate_limited: u64,
    /// Connections closed for an oversized frame
    pub closed_too_large: u64,
    /// Connections closed when revalidation failed
    pub closed_revoked: u64,
    /// Connections evicted by the heartbeat sweep
    pub stale_evictions: u64,
    /// Client frames accepted
    pub messages_received: u64,
    /// Broadcasts completed
    pub broadcasts_total: u64,
    /// Broadcasts refused by the router rate limit
    pub broadcasts_rate_limited: u64,
    /// Per-connection deliveries queued
    pub deliveries_sent: u64,
    /// Per-connection deliveries failed
    pub deliveries_failed: u64,
    /// Payloads received from the bus
    pub events_received: u64,
    /// Payloads dropped by validation
    pub events_invalid: u64,
    /// Events that could not be routed
    pub events_route_failed: u64,
}
