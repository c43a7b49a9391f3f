//! Staff access token verification.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

use tableside_core::config::AuthConfig;

use super::{AuthStrategy, Principal, timestamp_to_datetime};
use crate::claims::{StaffClaims, TokenType};
use crate::failure::AuthFailure;
use crate::revocation::RevocationList;

/// Verifies HS256 staff access tokens and checks the revocation list.
#[derive(Clone)]
pub struct JwtStrategy {
    decoding_key: DecodingKey,
    validation: Validation,
    revocations: Arc<dyn RevocationList>,
}

impl std::fmt::Debug for JwtStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtStrategy")
            .field("validation", &self.validation)
            .finish()
    }
}

impl JwtStrategy {
    /// Creates a strategy from auth configuration.
    pub fn new(config: &AuthConfig, revocations: Arc<dyn RevocationList>) -> Self {
        Self::with_secret(&config.jwt_secret, config.leeway_seconds, revocations)
    }

    /// Creates a strategy for an explicit secret, e.g. the pre-rotation one.
    pub fn with_secret(secret: &str, leeway_seconds: u64, revocations: Arc<dyn RevocationList>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = leeway_seconds;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            revocations,
        }
    }

    fn decode_claims(&self, token: &str) -> Result<StaffClaims, AuthFailure> {
        let data = decode::<StaffClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }
}

#[async_trait]
impl AuthStrategy for JwtStrategy {
    fn name(&self) -> &'static str {
        "jwt"
    }

    async fn authenticate(&self, credentials: &str) -> Result<Principal, AuthFailure> {
        let token = credentials.trim();
        if token.is_empty() {
            return Err(AuthFailure::Missing);
        }

        let claims = self.decode_claims(token)?;

        if claims.token_type != TokenType::Access {
            return Err(AuthFailure::WrongTokenType);
        }

        if let Some(jti) = claims.jti.as_deref() {
            if self.revocations.is_revoked(jti).await {
                return Err(AuthFailure::Revoked);
            }
        }

        let user_id = claims
            .sub
            .parse()
            .map_err(|_| AuthFailure::Malformed(format!("subject '{}' is not a user id", claims.sub)))?;

        Ok(Principal {
            user_id: Some(user_id),
            tenant_id: claims.tenant_id,
            branch_ids: claims.branch_ids,
            role: claims.role,
            session_id: None,
            table_id: None,
            token_id: claims.jti,
            expires_at: timestamp_to_datetime(claims.exp),
        })
    }
}
