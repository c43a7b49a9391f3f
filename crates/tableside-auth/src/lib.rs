//! # tableside-auth
//!
//! Token verification for gateway connections. Token *issuance* belongs to
//! the backend; this crate only checks what clients present.
//!
//! ## Modules
//!
//! - `claims`: staff JWT and diner table-token claim payloads
//! - `failure`: the [`AuthFailure`] taxonomy
//! - `revocation`: revoked token id list consulted on every verification
//! - `strategy`: the [`AuthStrategy`] capability and its variants

pub mod claims;
pub mod failure;
pub mod revocation;
pub mod strategy;

pub use claims::{StaffClaims, TableTokenClaims, TokenType};
pub use failure::AuthFailure;
pub use revocation::{MemoryRevocationList, RevocationList};
pub use strategy::{
    AuthStrategy, CompositeStrategy, JwtStrategy, NullStrategy, Principal, TableTokenStrategy,
};
