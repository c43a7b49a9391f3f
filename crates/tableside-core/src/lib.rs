//! # tableside-core
//!
//! Core crate for the Tableside real-time gateway. Contains the unified
//! error system, configuration schemas, scope identifiers and roles, the
//! immutable inbound event value object, and the collaborator traits the
//! gateway consumes from the rest of the platform.
//!
//! This crate has **no** internal dependencies on other Tableside crates.

pub mod config;
pub mod error;
pub mod events;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
