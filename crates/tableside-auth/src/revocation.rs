//! Revoked token ids.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

/// Set of revoked token ids (`jti`).
#[async_trait]
pub trait RevocationList: Send + Sync + std::fmt::Debug + 'static {
    /// Whether `jti` has been revoked.
    async fn is_revoked(&self, jti: &str) -> bool;

    /// Revoke `jti`.
    async fn revoke(&self, jti: &str);
}

/// In-memory revocation list.
///
/// Entries expire after the configured TTL, which should be at least the
/// longest token lifetime so a revoked token never becomes valid again.
#[derive(Debug, Clone)]
pub struct MemoryRevocationList {
    entries: Cache<String, ()>,
}

impl MemoryRevocationList {
    /// Create a list holding up to `max_capacity` ids for `ttl` each.
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }
}

impl Default for MemoryRevocationList {
    fn default() -> Self {
        Self::new(100_000, Duration::from_secs(24 * 3600))
    }
}

#[async_trait]
impl RevocationList for MemoryRevocationList {
    async fn is_revoked(&self, jti: &str) -> bool {
        self.entries.contains_key(jti)
    }

    async fn revoke(&self, jti: &str) {
        self.entries.insert(jti.to_string(), ()).await;
    }
}
