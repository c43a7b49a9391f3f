//! Rolling count of events dropped by validation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

/// Upper bound on remembered drop instants.
const MAX_TRACKED: usize = 10_000;

/// Tracks drops over a rolling window and raises an alert past a threshold.
#[derive(Debug)]
pub struct DropRateTracker {
    window: Duration,
    threshold: u64,
    drops: Mutex<VecDeque<Instant>>,
    total: AtomicU64,
    alerting: AtomicBool,
}

impl DropRateTracker {
    /// Alert when `threshold` drops land within `window`.
    pub fn new(threshold: u64, window: Duration) -> Self {
        Self {
            window,
            threshold: threshold.max(1),
            drops: Mutex::new(VecDeque::new()),
            total: AtomicU64::new(0),
            alerting: AtomicBool::new(false),
        }
    }

    /// Record one dropped event. Returns whether the alert is raised.
    pub fn record_drop(&self) -> bool {
        self.total.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut drops = self.drops.lock().unwrap_or_else(PoisonError::into_inner);
        drops.push_back(now);
        if drops.len() > MAX_TRACKED {
            drops.pop_front();
        }
        let count = self.prune(&mut drops, now);
        self.update_alert(count)
    }

    /// Drops inside the current window.
    pub fn recent(&self) -> u64 {
        let mut drops = self.drops.lock().unwrap_or_else(PoisonError::into_inner);
        self.prune(&mut drops, Instant::now())
    }

    /// Whether the alert is raised, re-evaluated against the current window.
    pub fn is_alerting(&self) -> bool {
        let count = self.recent();
        self.update_alert(count)
    }

    /// Drops since startup.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn prune(&self, drops: &mut VecDeque<Instant>, now: Instant) -> u64 {
        while let Some(oldest) = drops.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                drops.pop_front();
            } else {
                break;
            }
        }
        drops.len() as u64
    }

    fn update_alert(&self, count: u64) -> bool {
        let over = count >= self.threshold;
        let was = self.alerting.swap(over, Ordering::SeqCst);
        if over && !was {
            warn!(
                drops = count,
                window_secs = self.window.as_secs(),
                "Event drop rate above threshold"
            );
        } else if !over && was {
            info!(drops = count, "Event drop rate back to normal");
        }
        over
    }
}
