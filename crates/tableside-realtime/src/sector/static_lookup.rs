//! In-process sector assignments.

use async_trait::async_trait;
use dashmap::DashMap;

use tableside_core::result::AppResult;
use tableside_core::traits::SectorLookup;
use tableside_core::types::{SectorId, TenantId, UserId};

/// Sector assignments held in memory, for single-node deployments and tests.
#[derive(Debug, Default)]
pub struct StaticSectorLookup {
    assignments: DashMap<(TenantId, UserId), Vec<SectorId>>,
}

impl StaticSectorLookup {
    /// Create an empty lookup; unassigned users get no sectors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a user's assignments.
    pub fn assign(&self, tenant_id: TenantId, user_id: UserId, sectors: impl IntoIterator<Item = SectorId>) {
        self.assignments
            .insert((tenant_id, user_id), sectors.into_iter().collect());
    }

    /// Remove a user's assignments.
    pub fn unassign(&self, tenant_id: TenantId, user_id: UserId) {
        self.assignments.remove(&(tenant_id, user_id));
    }
}

#[async_trait]
impl SectorLookup for StaticSectorLookup {
    async fn get_sectors(&self, user_id: UserId, tenant_id: TenantId) -> AppResult<Vec<SectorId>> {
        Ok(self
            .assignments
            .get(&(tenant_id, user_id))
            .map(|s| s.value().clone())
            .unwrap_or_default())
    }
}
