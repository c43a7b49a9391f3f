//! Pluggable authentication strategies.
//!
//! Each endpoint kind is constructed with the strategy it needs (staff JWT,
//! diner table token, or a composite of several); sessions only ever see
//! the [`AuthStrategy`] trait object.

pub mod composite;
pub mod jwt;
pub mod null;
pub mod table_token;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tableside_core::types::{BranchId, Role, SessionId, TableId, TenantId, UserId};

use crate::failure::AuthFailure;

pub use composite::CompositeStrategy;
pub use jwt::JwtStrategy;
pub use null::NullStrategy;
pub use table_token::TableTokenStrategy;

/// Identity established by a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Staff user, `None` for anonymous diners.
    pub user_id: Option<UserId>,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Branches the principal may observe.
    pub branch_ids: Vec<BranchId>,
    /// Role.
    pub role: Role,
    /// Diner table session.
    pub session_id: Option<SessionId>,
    /// Diner table.
    pub table_id: Option<TableId>,
    /// Token id, when the token carries one.
    pub token_id: Option<String>,
    /// When the credential stops being valid.
    pub expires_at: DateTime<Utc>,
}

/// Verifies a credential presented by a connecting client.
#[async_trait]
pub trait AuthStrategy: Send + Sync + std::fmt::Debug + 'static {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Verify `credentials` and return the identity they establish.
    async fn authenticate(&self, credentials: &str) -> Result<Principal, AuthFailure>;

    /// Re-verify a credential that was accepted earlier.
    ///
    /// Fails once the token has expired or been revoked.
    async fn revalidate(&self, credentials: &str) -> Result<(), AuthFailure> {
        self.authenticate(credentials).await.map(|_| ())
    }
}

pub(crate) fn timestamp_to_datetime(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or_else(Utc::now)
}
