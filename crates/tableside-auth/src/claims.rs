//! Claim payloads carried by the two kinds of tokens the gateway accepts.

use serde::{Deserialize, Serialize};

use tableside_core::types::{BranchId, Role, SessionId, TableId, TenantId};

/// Distinguishes the token kinds the backend issues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived staff access token.
    Access,
    /// Long-lived staff refresh token (never valid on a socket).
    Refresh,
    /// Diner table token.
    Table,
}

/// Staff access token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffClaims {
    /// Subject: the backend user id, as a decimal string.
    pub sub: String,
    /// Tenant the user belongs to.
    pub tenant_id: TenantId,
    /// Branches the user may see.
    #[serde(default)]
    pub branch_ids: Vec<BranchId>,
    /// Role at issuance time.
    pub role: Role,
    /// Issued-at (seconds since epoch).
    #[serde(default)]
    pub iat: i64,
    /// Expiration (seconds since epoch).
    pub exp: i64,
    /// Token id used for revocation.
    #[serde(default)]
    pub jti: Option<String>,
    /// Token kind.
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// Diner table token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableTokenClaims {
    /// Tenant owning the table.
    pub tenant_id: TenantId,
    /// Branch the table is in.
    pub branch_id: BranchId,
    /// Physical table.
    pub table_id: TableId,
    /// Open table session.
    pub session_id: SessionId,
    /// Issued-at (seconds since epoch).
    #[serde(default)]
    pub iat: i64,
    /// Expiration (seconds since epoch).
    pub exp: i64,
    /// Token id used for revocation.
    #[serde(default)]
    pub jti: Option<String>,
    /// Token kind.
    #[serde(rename = "type")]
    pub token_type: TokenType,
}
