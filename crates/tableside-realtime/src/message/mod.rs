//! Client-facing frame types, close codes and inbound validation.

pub mod close_code;
pub mod types;
pub mod validator;

pub use close_code::CloseCode;
pub use types::{ClientMessage, ServerMessage};
