//! Prometheus text exposition.

use std::fmt::Write;

use serde::Serialize;

use super::MetricsSnapshot;
use crate::connection::registry::RegistryStats;

/// Point-in-time gauges gathered from engine components.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EngineGauges {
    /// Registry index sizes.
    pub registry: RegistryStats,
    /// Breaker state gauge: 0 closed, 1 half-open, 2 open.
    pub breaker_state: u8,
    /// Times the breaker has opened.
    pub breaker_opened_total: u64,
    /// Validation drops inside the current window.
    pub drop_rate_recent: u64,
    /// Whether the drop-rate alert is raised.
    pub drop_rate_alert: bool,
    /// Cached scope locks.
    pub lock_cache_size: usize,
    /// Broadcasts currently running.
    pub broadcasts_in_flight: usize,
}

/// Render counters and gauges in the Prometheus text format.
pub fn render_prometheus(snapshot: &MetricsSnapshot, gauges: &EngineGauges) -> String {
    let mut out = String::with_capacity(4096);

    let counters: &[(&str, &str, u64)] = &[
        ("tableside_connections_total", "Connections registered since startup", snapshot.connections_total),
        ("tableside_rejected_auth_total", "Handshakes rejected for credentials", snapshot.rejected_auth),
        ("tableside_rejected_forbidden_total", "Handshakes rejected for role or origin", snapshot.rejected_forbidden),
        ("tableside_rejected_capacity_total", "Handshakes rejected by connection limits", snapshot.rejected_capacity),
        ("tableside_rejected_lookup_total", "Handshakes failed by sector lookup", snapshot.rejected_lookup),
        ("tableside_rejected_unavailable_total", "Handshakes refused during shutdown", snapshot.rejected_unavailable),
        ("tableside_closed_rate_limited_total", "Connections closed for message rate", snapshot.closed_rate_limited),
        ("tableside_closed_too_large_total", "Connections closed for oversized frames", snapshot.closed_too_large),
        ("tableside_closed_revoked_total", "Connections closed at revalidation", snapshot.closed_revoked),
        ("tableside_stale_evictions_total", "Connections evicted by the heartbeat sweep", snapshot.stale_evictions),
        ("tableside_messages_received_total", "Client frames accepted", snapshot.messages_received),
        ("tableside_broadcasts_total", "Broadcasts completed", snapshot.broadcasts_total),
        ("tableside_broadcasts_rate_limited_total", "Broadcasts refused by the router rate limit", snapshot.broadcasts_rate_limited),
        ("tableside_deliveries_sent_total", "Per-connection deliveries queued", snapshot.deliveries_sent),
        ("tableside_deliveries_failed_total", "Per-connection deliveries failed", snapshot.deliveries_failed),
        ("tableside_events_received_total", "Payloads received from the bus", snapshot.events_received),
        ("tableside_events_invalid_total", "Payloads dropped by validation", snapshot.events_invalid),
        ("tableside_events_route_failed_total", "Events that could not be routed", snapshot.events_route_failed),
        ("tableside_bus_breaker_opened_total", "Times the bus circuit breaker opened", gauges.breaker_opened_total),
    ];
    for &(name, help, value) in counters {
        write_metric(&mut out, name, help, "counter", value);
    }

    let stats = &gauges.registry;
    let gauge_values: &[(&str, &str, u64)] = &[
        ("tableside_connections_active", "Connections currently registered", stats.connections as u64),
        ("tableside_indexed_users", "Users with an open connection", stats.users as u64),
        ("tableside_indexed_branches", "Branches with an open connection", stats.branches as u64),
        ("tableside_indexed_sectors", "Sectors with an open connection", stats.sectors as u64),
        ("tableside_indexed_sessions", "Table sessions with an open connection", stats.sessions as u64),
        ("tableside_bus_breaker_state", "Bus circuit breaker state (0 closed, 1 half-open, 2 open)", u64::from(gauges.breaker_state)),
        ("tableside_events_dropped_recent", "Validation drops in the current window", gauges.drop_rate_recent),
        ("tableside_events_drop_alert", "Whether the drop-rate alert is raised", u64::from(gauges.drop_rate_alert)),
        ("tableside_lock_cache_size", "Cached scope locks", gauges.lock_cache_size as u64),
        ("tableside_broadcasts_in_flight", "Broadcasts currently running", gauges.broadcasts_in_flight as u64),
    ];
    for &(name, help, value) in gauge_values {
        write_metric(&mut out, name, help, "gauge", value);
    }

    out
}

fn write_metric(out: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
    let _ = writeln!(out, "{name} {value}");
}
