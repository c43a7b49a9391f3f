//! Per-connection endpoint sessions.

pub mod endpoint;
pub mod guard;
pub mod lifecycle;

pub use endpoint::EndpointKind;
pub use lifecycle::{ClientFrame, EndpointSession, FrameSource, SessionOutcome, SessionState};
