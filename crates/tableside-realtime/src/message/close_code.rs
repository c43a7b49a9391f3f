//! WebSocket close codes used by the gateway.

use std::fmt;

/// Close codes sent to clients when the gateway ends a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000: orderly close.
    Normal,
    /// 1001: server shutdown or stale-connection eviction.
    GoingAway,
    /// 1008: oversized frame or a connection limit hit.
    PolicyViolation,
    /// 1011: internal failure such as a sector lookup error.
    InternalError,
    /// 4001: credential missing, invalid, expired or revoked.
    AuthFailed,
    /// 4003: role not allowed on the endpoint, or origin rejected.
    Forbidden,
    /// 4029: per-connection message rate exceeded.
    RateLimited,
}

impl CloseCode {
    /// Numeric code on the wire.
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::PolicyViolation => 1008,
            Self::InternalError => 1011,
            Self::AuthFailed => 4001,
            Self::Forbidden => 4003,
            Self::RateLimited => 4029,
        }
    }

    /// Default human-readable reason.
    pub fn reason(self) -> &'static str {
        match self {
            Self::Normal => "normal closure",
            Self::GoingAway => "going away",
            Self::PolicyViolation => "policy violation",
            Self::InternalError => "internal error",
            Self::AuthFailed => "authentication failed",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate limit exceeded",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes() {
        assert_eq!(CloseCode::AuthFailed.code(), 4001);
        assert_eq!(CloseCode::Forbidden.code(), 4003);
        assert_eq!(CloseCode::RateLimited.code(), 4029);
        assert_eq!(CloseCode::PolicyViolation.code(), 1008);
        assert_eq!(CloseCode::GoingAway.to_string(), "1001 (going away)");
    }
}
