//! Caching decorator for sector lookups.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use tableside_core::result::AppResult;
use tableside_core::traits::SectorLookup;
use tableside_core::types::{SectorId, TenantId, UserId};

/// Caches assignments from an inner lookup for a short TTL.
///
/// Concurrent misses for the same user coalesce into one inner call.
/// Failures are not cached.
#[derive(Debug)]
pub struct CachedSectorLookup {
    inner: Arc<dyn SectorLookup>,
    cache: Cache<(TenantId, UserId), Vec<SectorId>>,
}

impl CachedSectorLookup {
    /// Wrap `inner` with a cache of `max_capacity` entries living for `ttl`.
    pub fn new(inner: Arc<dyn SectorLookup>, max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { inner, cache }
    }
}

#[async_trait]
impl SectorLookup for CachedSectorLookup {
    async fn get_sectors(&self, user_id: UserId, tenant_id: TenantId) -> AppResult<Vec<SectorId>> {
        let inner = Arc::clone(&self.inner);
        self.cache
            .try_get_with((tenant_id, user_id), async move {
                inner.get_sectors(user_id, tenant_id).await
            })
            .await
            .map_err(|e| (*e).clone())
    }

    async fn invalidate(&self, user_id: UserId, tenant_id: TenantId) {
        self.cache.invalidate(&(tenant_id, user_id)).await;
        self.inner.invalidate(user_id, tenant_id).await;
    }
}
