//! Diner table token verification.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

use tableside_core::config::AuthConfig;
use tableside_core::types::Role;

use super::{AuthStrategy, Principal, timestamp_to_datetime};
use crate::claims::{TableTokenClaims, TokenType};
use crate::failure::AuthFailure;
use crate::revocation::RevocationList;

/// Verifies table tokens handed to diners when a table session opens.
#[derive(Clone)]
pub struct TableTokenStrategy {
    decoding_key: DecodingKey,
    validation: Validation,
    revocations: Arc<dyn RevocationList>,
}

impl std::fmt::Debug for TableTokenStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableTokenStrategy").finish()
    }
}

impl TableTokenStrategy {
    /// Creates a strategy from auth configuration.
    pub fn new(config: &AuthConfig, revocations: Arc<dyn RevocationList>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = config.leeway_seconds;

        Self {
            decoding_key: DecodingKey::from_secret(config.table_token_secret.as_bytes()),
            validation,
            revocations,
        }
    }
}

#[async_trait]
impl AuthStrategy for TableTokenStrategy {
    fn name(&self) -> &'static str {
        "table_token"
    }

    async fn authenticate(&self, credentials: &str) -> Result<Principal, AuthFailure> {
        let token = credentials.trim();
        if token.is_empty() {
            return Err(AuthFailure::Missing);
        }

        let claims = decode::<TableTokenClaims>(token, &self.decoding_key, &self.validation)?.claims;

        if claims.token_type != TokenType::Table {
            return Err(AuthFailure::WrongTokenType);
        }

        if let Some(jti) = claims.jti.as_deref() {
            if self.revocations.is_revoked(jti).await {
                return Err(AuthFailure::Revoked);
            }
        }

        Ok(Principal {
            user_id: None,
            tenant_id: claims.tenant_id,
            branch_ids: vec![claims.branch_id],
            role: Role::Diner,
            session_id: Some(claims.session_id),
            table_id: Some(claims.table_id),
            token_id: claims.jti,
            expires_at: timestamp_to_datetime(claims.exp),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revocation::MemoryRevocationList;
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn config() -> AuthConfig {
        AuthConfig {
            table_token_secret: "table-secret".to_string(),
            leeway_seconds: 0,
            ..AuthConfig::default()
        }
    }

    fn sign(token_type: TokenType) -> String {
        let now = Utc::now().timestamp();
        let claims = TableTokenClaims {
            tenant_id: 1,
            branch_id: 5,
            table_id: 12,
            session_id: 99,
            iat: now,
            exp: now + 3600,
            jti: None,
            token_type,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"table-secret"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_table_token_yields_diner() {
        let strategy =
            TableTokenStrategy::new(&config(), Arc::new(MemoryRevocationList::default()));
        let principal = strategy.authenticate(&sign(TokenType::Table)).await.unwrap();

        assert_eq!(principal.role, Role::Diner);
        assert_eq!(principal.user_id, None);
        assert_eq!(principal.session_id, Some(99));
        assert_eq!(principal.table_id, Some(12));
        assert_eq!(principal.branch_ids, vec![5]);
    }

    #[tokio::test]
    async fn test_staff_type_rejected() {
        let strategy =
            TableTokenStrategy::new(&config(), Arc::new(MemoryRevocationList::default()));
        assert_eq!(
            strategy
                .authenticate(&sign(TokenType::Access))
                .await
                .unwrap_err(),
            AuthFailure::WrongTokenType
        );
    }
}
