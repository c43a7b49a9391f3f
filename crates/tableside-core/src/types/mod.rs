//! Shared identifier and role types.

pub mod id;
pub mod role;

pub use id::{BranchId, ConnectionId, SectorId, SessionId, TableId, TenantId, UserId};
pub use role::Role;
