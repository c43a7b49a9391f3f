//! Events received from the backend over the shared event bus.
//!
//! The backend publishes one JSON envelope per domain change. The gateway
//! never interprets the payload; it validates the routing fields and carries
//! the rest through to clients unchanged.

pub mod inbound;

pub use inbound::{EventValidationError, InboundEvent};
