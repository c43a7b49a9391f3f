//! Sharded scope locks.
//!
//! Every registry mutation and scope lookup runs under the locks of the
//! scopes it touches. Locks are always taken in the canonical order given by
//! [`LockScope`]'s `Ord` (global, user, branch, sector, session, cleanup, and
//! ascending id within a kind), so any two operations that need overlapping
//! sets acquire them in the same order and cannot deadlock.
//!
//! Lock objects are created lazily and cached. Once the cache grows past the
//! high-water mark, unheld locks are evicted until it is back at the
//! low-water mark.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use tableside_core::config::LockConfig;
use tableside_core::error::AppError;
use tableside_core::types::{BranchId, SectorId, SessionId, UserId};

/// A lockable scope. Variant order is the acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockScope {
    /// Process-wide operations.
    Global,
    /// One user's connection set.
    User(UserId),
    /// One branch's connection set.
    Branch(BranchId),
    /// One sector's connection set.
    Sector(SectorId),
    /// One table session's connection set.
    Session(SessionId),
    /// The stale-connection sweep.
    Cleanup,
}

impl LockScope {
    /// Global and cleanup locks are never evicted.
    fn is_pinned(self) -> bool {
        matches!(self, Self::Global | Self::Cleanup)
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::User(id) => write!(f, "user:{id}"),
            Self::Branch(id) => write!(f, "branch:{id}"),
            Self::Sector(id) => write!(f, "sector:{id}"),
            Self::Session(id) => write!(f, "session:{id}"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Holds a set of scope locks. Dropping it releases them all.
pub struct ScopeGuard {
    scopes: Vec<LockScope>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ScopeGuard {
    /// Scopes held, in acquisition order.
    pub fn scopes(&self) -> &[LockScope] {
        &self.scopes
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Lazily created, bounded cache of per-scope async mutexes.
#[derive(Debug)]
pub struct LockManager {
    locks: DashMap<LockScope, Arc<Mutex<()>>>,
    config: LockConfig,
    evicted: AtomicU64,
}

impl LockManager {
    /// Create a lock manager with the given cache bounds.
    pub fn new(config: LockConfig) -> Self {
        Self {
            locks: DashMap::new(),
            config,
            evicted: AtomicU64::new(0),
        }
    }

    /// Acquire every scope in `scopes` in canonical order.
    ///
    /// Duplicates are collapsed. Fails with a timeout error if the whole set
    /// cannot be acquired within the configured deadline; locks taken so far
    /// are released on failure.
    pub async fn acquire(
        &self,
        scopes: impl IntoIterator<Item = LockScope>,
    ) -> Result<ScopeGuard, AppError> {
        let ordered: BTreeSet<LockScope> = scopes.into_iter().collect();
        let deadline = self.config.acquire_timeout();

        match tokio::time::timeout(deadline, self.acquire_ordered(&ordered)).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                let scopes: Vec<String> = ordered.iter().map(ToString::to_string).collect();
                Err(AppError::timeout(format!(
                    "Timed out after {}ms acquiring locks [{}]",
                    deadline.as_millis(),
                    scopes.join(", ")
                )))
            }
        }
    }

    async fn acquire_ordered(&self, ordered: &BTreeSet<LockScope>) -> ScopeGuard {
        let mut guards = Vec::with_capacity(ordered.len());
        for scope in ordered {
            let lock = self.lock_for(*scope);
            guards.push(lock.lock_owned().await);
        }
        ScopeGuard {
            scopes: ordered.iter().copied().collect(),
            _guards: guards,
        }
    }

    fn lock_for(&self, scope: LockScope) -> Arc<Mutex<()>> {
        let lock = self
            .locks
            .entry(scope)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        self.evict_if_needed();
        lock
    }

    /// Evict unheld locks once the cache exceeds the high-water mark.
    ///
    /// A lock whose only reference is the cache entry is neither held nor
    /// awaited, so dropping it is safe: the next user recreates it.
    fn evict_if_needed(&self) {
        let len = self.locks.len();
        if len <= self.config.high_water {
            return;
        }

        let mut excess = len.saturating_sub(self.config.low_water);
        let mut removed = 0u64;
        self.locks.retain(|scope, lock| {
            if excess == 0 || scope.is_pinned() || Arc::strong_count(lock) > 1 {
                return true;
            }
            excess -= 1;
            removed += 1;
            false
        });

        self.evicted.fetch_add(removed, Ordering::Relaxed);
        debug!(removed, remaining = self.locks.len(), "Evicted idle scope locks");
    }

    /// Number of cached lock objects.
    pub fn cached(&self) -> usize {
        self.locks.len()
    }

    /// Total locks evicted since startup.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}
