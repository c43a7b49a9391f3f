//! Fixed-identity strategy for tests and local development.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use tableside_core::types::{BranchId, Role, SessionId, TableId, TenantId, UserId};

use super::{AuthStrategy, Principal};
use crate::failure::AuthFailure;

/// Accepts any non-empty credential as a preconfigured principal.
///
/// Can be switched to refuse everything so tests can exercise the
/// re-validation path.
#[derive(Debug)]
pub struct NullStrategy {
    principal: Principal,
    accepting: AtomicBool,
}

impl NullStrategy {
    /// Accept as the given principal.
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            accepting: AtomicBool::new(true),
        }
    }

    /// Accept as a staff member.
    pub fn staff(role: Role, tenant_id: TenantId, branch_ids: Vec<BranchId>) -> Self {
        Self::staff_user(1, role, tenant_id, branch_ids)
    }

    /// Accept as a specific staff user.
    pub fn staff_user(
        user_id: UserId,
        role: Role,
        tenant_id: TenantId,
        branch_ids: Vec<BranchId>,
    ) -> Self {
        Self::new(Principal {
            user_id: Some(user_id),
            tenant_id,
            branch_ids,
            role,
            session_id: None,
            table_id: None,
            token_id: None,
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    /// Accept as a diner at a table session.
    pub fn diner(
        tenant_id: TenantId,
        branch_id: BranchId,
        table_id: TableId,
        session_id: SessionId,
    ) -> Self {
        Self::new(Principal {
            user_id: None,
            tenant_id,
            branch_ids: vec![branch_id],
            role: Role::Diner,
            session_id: Some(session_id),
            table_id: Some(table_id),
            token_id: None,
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    /// Start refusing every credential, as if all tokens were revoked.
    pub fn revoke_all(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthStrategy for NullStrategy {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn authenticate(&self, credentials: &str) -> Result<Principal, AuthFailure> {
        if credentials.trim().is_empty() {
            return Err(AuthFailure::Missing);
        }
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(AuthFailure::Revoked);
        }
        Ok(self.principal.clone())
    }
}
