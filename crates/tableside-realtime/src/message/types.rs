//! Inbound and outbound WebSocket message type definitions.
//!
//! Domain events are forwarded to clients as their own JSON envelope; the
//! types here cover only the control messages exchanged on the socket.

use serde::{Deserialize, Serialize};

use tableside_core::error::AppError;
use tableside_core::types::{ConnectionId, Role, SectorId};

/// Messages sent by the client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Application-level heartbeat.
    Ping,
    /// Reply to a server ping; also counts as a heartbeat.
    Pong,
    /// Re-read this waiter's sector assignments.
    RefreshSectors,
}

impl ClientMessage {
    /// Parse a text frame. A bare `ping` is accepted alongside JSON.
    pub fn parse(text: &str) -> Result<Self, AppError> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("ping") {
            return Ok(Self::Ping);
        }
        serde_json::from_str(trimmed)
            .map_err(|e| AppError::validation(format!("Unrecognized client message: {e}")))
    }
}

/// Messages sent by the server to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after a successful registration.
    Connected {
        /// Connection ID assigned by the gateway.
        connection_id: ConnectionId,
        /// Authenticated role.
        role: Role,
        /// Expected heartbeat cadence in seconds.
        heartbeat_interval: u64,
    },
    /// Heartbeat reply.
    Pong,
    /// Result of a sector refresh.
    SectorsUpdated {
        /// The sectors now in effect.
        sector_ids: Vec<SectorId>,
    },
    /// Non-fatal error report.
    Error {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
    },
}

impl ServerMessage {
    /// Build an error message.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Serialize to the text frame sent on the socket.
    pub fn to_json(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_heartbeats() {
        assert_eq!(ClientMessage::parse("ping").unwrap(), ClientMessage::Ping);
        assert_eq!(
            ClientMessage::parse(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"refresh_sectors"}"#).unwrap(),
            ClientMessage::RefreshSectors
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(ClientMessage::parse(r#"{"type":"subscribe"}"#).is_err());
        assert!(ClientMessage::parse("hello").is_err());
    }

    #[test]
    fn test_server_message_shape() {
        let json = ServerMessage::SectorsUpdated {
            sector_ids: vec![3, 4],
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"sectors_updated","sector_ids":[3,4]}"#);
        assert_eq!(ServerMessage::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
    }
}
