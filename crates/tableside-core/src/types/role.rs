//! Connection role enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Roles a connection can authenticate as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Tenant administrator.
    Admin,
    /// Branch manager.
    Manager,
    /// Kitchen terminal.
    Kitchen,
    /// Waiter device.
    Waiter,
    /// Customer ordering session at a table.
    Diner,
}

impl Role {
    /// Whether this is a staff role (anything but a diner).
    pub fn is_staff(&self) -> bool {
        !matches!(self, Self::Diner)
    }

    /// Whether this role has sector assignments resolved at registration.
    pub fn uses_sectors(&self) -> bool {
        matches!(self, Self::Waiter)
    }

    /// Return the role as an uppercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Manager => "MANAGER",
            Self::Kitchen => "KITCHEN",
            Self::Waiter => "WAITER",
            Self::Diner => "DINER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = crate::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Ok(Self::Admin),
            "MANAGER" => Ok(Self::Manager),
            "KITCHEN" => Ok(Self::Kitchen),
            "WAITER" => Ok(Self::Waiter),
            "DINER" => Ok(Self::Diner),
            _ => Err(crate::AppError::validation(format!(
                "Invalid role: '{s}'. Expected one of: ADMIN, MANAGER, KITCHEN, WAITER, DINER"
            ))),
        }
    }
}
