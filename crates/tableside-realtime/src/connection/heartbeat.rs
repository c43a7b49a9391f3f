//! Application-level heartbeat tracking and stale-connection eviction.
//!
//! Only client `ping`/`pong` messages count as heartbeats; transport-level
//! ping frames answered by the WebSocket stack do not.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tableside_core::result::AppResult;
use tableside_core::types::ConnectionId;

use super::handle::ConnectionHandle;
use super::lock::{LockManager, LockScope};
use super::registry::ConnectionRegistry;

#[derive(Debug, Clone, Copy)]
struct Liveness {
    last_seen: Instant,
    flagged: bool,
}

impl Liveness {
    fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        self.flagged || now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Last-heartbeat bookkeeping for every tracked connection.
#[derive(Debug)]
pub struct HeartbeatTracker {
    entries: DashMap<ConnectionId, Liveness>,
    locks: Arc<LockManager>,
    registry: Arc<ConnectionRegistry>,
}

impl HeartbeatTracker {
    /// Create a tracker evicting from `registry`.
    pub fn new(locks: Arc<LockManager>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            entries: DashMap::new(),
            locks,
            registry,
        }
    }

    /// Record a heartbeat for `id` now. Clears any stale flag.
    pub fn record(&self, id: ConnectionId) {
        self.entries.insert(
            id,
            Liveness {
                last_seen: Instant::now(),
                flagged: false,
            },
        );
    }

    /// Last heartbeat for `id`. Unknown connections report the current instant.
    pub fn last_heartbeat(&self, id: &ConnectionId) -> Instant {
        self.entries
            .get(id)
            .map(|e| e.last_seen)
            .unwrap_or_else(Instant::now)
    }

    /// Mark a connection stale so the next sweep evicts it regardless of age.
    pub fn flag_stale(&self, id: &ConnectionId) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            if !entry.flagged {
                debug!(conn_id = %id, "Connection flagged stale");
            }
            entry.flagged = true;
        }
    }

    /// Stop tracking `id`.
    pub fn forget(&self, id: &ConnectionId) {
        self.entries.remove(id);
    }

    /// Number of tracked connections.
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    /// Evict connections that are flagged or silent for longer than `timeout`.
    ///
    /// Candidates are collected under the cleanup lock, then re-checked and
    /// removed under it again, so a heartbeat that lands in between spares
    /// the connection. Evicted connections are unregistered from every index
    /// and returned; closing their sockets is left to the caller.
    pub async fn cleanup_stale(&self, timeout: Duration) -> AppResult<Vec<Arc<ConnectionHandle>>> {
        let candidates = self.stale_candidates(timeout).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let confirmed = self.confirm_stale(candidates, timeout).await?;

        // Registry locks rank before the cleanup lock, so unregister after
        // releasing it.
        let mut evicted = Vec::with_capacity(confirmed.len());
        for id in confirmed {
            match self.registry.unregister(&id).await {
                Ok(Some(handle)) => evicted.push(handle),
                Ok(None) => debug!(conn_id = %id, "Stale connection already unregistered"),
                Err(e) => warn!(conn_id = %id, error = %e, "Failed to unregister stale connection"),
            }
        }

        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted stale connections");
        }
        Ok(evicted)
    }

    async fn stale_candidates(&self, timeout: Duration) -> AppResult<Vec<ConnectionId>> {
        let _guard = self.locks.acquire([LockScope::Cleanup]).await?;
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.value().is_stale(now, timeout))
            .map(|e| *e.key())
            .collect())
    }

    /// Drop candidates that are still stale; the rest heartbeat meanwhile.
    async fn confirm_stale(
        &self,
        candidates: Vec<ConnectionId>,
        timeout: Duration,
    ) -> AppResult<Vec<ConnectionId>> {
        let _guard = self.locks.acquire([LockScope::Cleanup]).await?;
        let now = Instant::now();
        Ok(candidates
            .into_iter()
            .filter(|id| {
                self.entries
                    .remove_if(id, |_, liveness| liveness.is_stale(now, timeout))
                    .is_some()
            })
            .collect())
    }
}
