//! Identifier types.
//!
//! Tenant, branch, sector, user, session and table identifiers come from the
//! backend database and are plain integers. Connection identifiers are minted
//! by the gateway itself and wrap a [`uuid::Uuid`] so they can never be
//! confused with a backend id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Backend tenant (restaurant group) identifier.
pub type TenantId = i64;
/// Backend branch (restaurant location) identifier.
pub type BranchId = i64;
/// Backend sector (floor area) identifier.
pub type SectorId = i64;
/// Backend staff user identifier.
pub type UserId = i64;
/// Backend table session identifier.
pub type SessionId = i64;
/// Backend table identifier.
pub type TableId = i64;

/// Unique identifier for one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return the inner UUID value.
    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
