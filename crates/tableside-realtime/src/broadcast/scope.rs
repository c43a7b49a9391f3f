//! Broadcast target scopes.

use std::fmt;

use tableside_core::types::{BranchId, SectorId, SessionId, TenantId, UserId};

/// Who a broadcast is addressed to. Every scope is tenant-qualified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BroadcastScope {
    /// Every connection indexed under a branch.
    Branch {
        /// Owning tenant.
        tenant_id: TenantId,
        /// Target branch.
        branch_id: BranchId,
    },
    /// Connections assigned to a sector of a branch.
    Sector {
        /// Owning tenant.
        tenant_id: TenantId,
        /// Branch the sector belongs to.
        branch_id: BranchId,
        /// Target sector.
        sector_id: SectorId,
    },
    /// Diners at one table session.
    Session {
        /// Owning tenant.
        tenant_id: TenantId,
        /// Target table session.
        session_id: SessionId,
    },
    /// Every connection of one staff user.
    User {
        /// Owning tenant.
        tenant_id: TenantId,
        /// Target user.
        user_id: UserId,
    },
}

impl BroadcastScope {
    /// Tenant the scope is restricted to.
    pub fn tenant_id(&self) -> TenantId {
        match *self {
            Self::Branch { tenant_id, .. }
            | Self::Sector { tenant_id, .. }
            | Self::Session { tenant_id, .. }
            | Self::User { tenant_id, .. } => tenant_id,
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Branch { .. } => "branch",
            Self::Sector { .. } => "sector",
            Self::Session { .. } => "session",
            Self::User { .. } => "user",
        }
    }
}

impl fmt::Display for BroadcastScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Branch { tenant_id, branch_id } => {
                write!(f, "tenant:{tenant_id}/branch:{branch_id}")
            }
            Self::Sector {
                tenant_id,
                branch_id,
                sector_id,
            } => write!(f, "tenant:{tenant_id}/branch:{branch_id}/sector:{sector_id}"),
            Self::Session {
                tenant_id,
                session_id,
            } => write!(f, "tenant:{tenant_id}/session:{session_id}"),
            Self::User { tenant_id, user_id } => write!(f, "tenant:{tenant_id}/user:{user_id}"),
        }
    }
}
