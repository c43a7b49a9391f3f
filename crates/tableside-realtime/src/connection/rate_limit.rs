//! Sliding-window message rate limiting.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use tableside_core::types::ConnectionId;

/// Sliding window over the last `capacity` accepted hits.
///
/// The ring never holds more than `capacity` instants; a hit is accepted
/// when the ring has room after dropping entries older than the window.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: usize,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    /// Allow `capacity` hits per `window`.
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            hits: VecDeque::with_capacity(capacity),
        }
    }

    /// Try to record a hit at `now`.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.hits.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        if self.hits.len() >= self.capacity {
            return false;
        }
        self.hits.push_back(now);
        true
    }

    /// Hits currently inside the window.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Whether no hits are inside the window.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Per-connection rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<ConnectionId, SlidingWindow>,
    max_messages: usize,
    window: Duration,
}

impl RateLimiter {
    /// Allow `max_messages` per `window` for each connection.
    pub fn new(max_messages: usize, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_messages,
            window,
        }
    }

    /// Record one message for `id`; `false` when over the limit.
    pub fn is_allowed(&self, id: ConnectionId) -> bool {
        self.windows
            .entry(id)
            .or_insert_with(|| SlidingWindow::new(self.max_messages, self.window))
            .try_acquire(Instant::now())
    }

    /// Drop the window for a closed connection.
    pub fn remove(&self, id: &ConnectionId) {
        self.windows.remove(id);
    }

    /// Connections with an active window.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
