//! Token verification configuration.

use serde::{Deserialize, Serialize};

/// Secrets and tolerances used to verify staff JWTs and diner table tokens.
///
/// Token issuance lives in the backend; the gateway only verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for staff access tokens.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Previous staff secret, still accepted while tokens signed with it
    /// are in circulation after a rotation.
    #[serde(default)]
    pub previous_jwt_secret: Option<String>,
    /// HMAC secret for diner table tokens.
    #[serde(default = "default_table_token_secret")]
    pub table_token_secret: String,
    /// Clock skew tolerance applied to `exp` checks.
    #[serde(default = "default_leeway")]
    pub leeway_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            previous_jwt_secret: None,
            table_token_secret: default_table_token_secret(),
            leeway_seconds: default_leeway(),
        }
    }
}

fn default_jwt_secret() -> String {
    "CHANGE_ME_IN_PRODUCTION".to_string()
}

fn default_table_token_secret() -> String {
    "CHANGE_ME_TABLE_TOKENS".to_string()
}

fn default_leeway() -> u64 {
    5
}
