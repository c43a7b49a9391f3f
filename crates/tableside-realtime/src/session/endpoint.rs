//! WebSocket endpoint kinds and their role gates.

use std::fmt;

use tableside_core::types::Role;

/// The WebSocket endpoints the gateway serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// `/ws/waiter`: floor staff, sector-filtered.
    Waiter,
    /// `/ws/kitchen`: kitchen displays.
    Kitchen,
    /// `/ws/admin`: managers and administrators.
    Admin,
    /// `/ws/diner`: a table session, authenticated with a table token.
    Diner,
}

impl EndpointKind {
    /// Whether `role` may connect to this endpoint.
    pub fn allows(self, role: Role) -> bool {
        match self {
            Self::Waiter => matches!(role, Role::Waiter | Role::Manager | Role::Admin),
            Self::Kitchen => matches!(role, Role::Kitchen | Role::Manager | Role::Admin),
            Self::Admin => matches!(role, Role::Manager | Role::Admin),
            Self::Diner => role == Role::Diner,
        }
    }

    /// Query parameter carrying the credential.
    pub fn credential_param(self) -> &'static str {
        match self {
            Self::Diner => "table_token",
            _ => "token",
        }
    }

    /// Route path.
    pub fn path(self) -> &'static str {
        match self {
            Self::Waiter => "/ws/waiter",
            Self::Kitchen => "/ws/kitchen",
            Self::Admin => "/ws/admin",
            Self::Diner => "/ws/diner",
        }
    }

    /// Short name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiter => "waiter",
            Self::Kitchen => "kitchen",
            Self::Admin => "admin",
            Self::Diner => "diner",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_gates() {
        assert!(EndpointKind::Waiter.allows(Role::Manager));
        assert!(!EndpointKind::Waiter.allows(Role::Kitchen));
        assert!(EndpointKind::Kitchen.allows(Role::Admin));
        assert!(!EndpointKind::Admin.allows(Role::Waiter));
        assert!(EndpointKind::Diner.allows(Role::Diner));
        assert!(!EndpointKind::Diner.allows(Role::Admin));
    }

    #[test]
    fn test_credential_params() {
        assert_eq!(EndpointKind::Diner.credential_param(), "table_token");
        assert_eq!(EndpointKind::Kitchen.credential_param(), "token");
    }
}
