//! Sector assignment lookup capability.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::{SectorId, TenantId, UserId};

/// Resolves which floor sectors a waiter is currently assigned to.
///
/// Implementations may hit a database or cache. Callers always wrap the
/// call in a deadline and treat expiry as a failure.
#[async_trait]
pub trait SectorLookup: Send + Sync + std::fmt::Debug + 'static {
    /// Sector ids assigned to `user_id` within `tenant_id`.
    async fn get_sectors(&self, user_id: UserId, tenant_id: TenantId) -> AppResult<Vec<SectorId>>;

    /// Drop any cached assignment so the next lookup reads fresh data.
    async fn invalidate(&self, _user_id: UserId, _tenant_id: TenantId) {}
}
