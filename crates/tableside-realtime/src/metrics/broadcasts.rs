//! Broadcast metrics, recorded through the router's observer hook.

use std::sync::atomic::Ordering;

use super::GatewayMetrics;
use crate::broadcast::observer::{BroadcastContext, BroadcastObserver};
use crate::broadcast::router::BroadcastReport;

impl BroadcastObserver for GatewayMetrics {
    fn on_broadcast(&self, report: &BroadcastReport, _ctx: &BroadcastContext<'_>) {
        self.broadcasts_total.fetch_add(1, Ordering::Relaxed);
        self.deliveries_sent
            .fetch_add(report.sent as u64, Ordering::Relaxed);
        self.deliveries_failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    fn on_rate_limited(&self, _ctx: &BroadcastContext<'_>) {
        self.broadcasts_rate_limited.fetch_add(1, Ordering::Relaxed);
    }
}
