//! Authentication failure taxonomy.

use thiserror::Error;

use tableside_core::error::AppError;

/// Why a credential was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// No credential was presented.
    #[error("credential missing")]
    Missing,
    /// The credential could not be decoded.
    #[error("malformed credential: {0}")]
    Malformed(String),
    /// The credential has expired.
    #[error("credential expired")]
    Expired,
    /// The signature does not match.
    #[error("invalid signature")]
    InvalidSignature,
    /// A valid token of the wrong kind (e.g. refresh token on a socket).
    #[error("wrong token type")]
    WrongTokenType,
    /// The token id is on the revocation list.
    #[error("credential revoked")]
    Revoked,
    /// Authenticated, but not allowed here.
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl AuthFailure {
    /// Short label used for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Malformed(_) => "malformed",
            Self::Expired => "expired",
            Self::InvalidSignature => "invalid_signature",
            Self::WrongTokenType => "wrong_token_type",
            Self::Revoked => "revoked",
            Self::Forbidden(_) => "forbidden",
        }
    }

    /// Whether the failure is an authorization refusal rather than bad credentials.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden(_))
    }
}

impl From<jsonwebtoken::errors::Error> for AuthFailure {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            _ => Self::Malformed(err.to_string()),
        }
    }
}

impl From<AuthFailure> for AppError {
    fn from(failure: AuthFailure) -> Self {
        if failure.is_forbidden() {
            AppError::authorization(failure.to_string())
        } else {
            AppError::authentication(failure.to_string())
        }
    }
}
