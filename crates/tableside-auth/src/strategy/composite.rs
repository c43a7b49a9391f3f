//! Strategy that tries several strategies in order.

use std::sync::Arc;

use async_trait::async_trait;

use super::{AuthStrategy, Principal};
use crate::failure::AuthFailure;

/// Accepts a credential if any inner strategy accepts it.
///
/// On total failure the most specific refusal wins: an expired or revoked
/// verdict from one strategy is more useful than "malformed" from another
/// strategy that simply did not recognise the token format.
#[derive(Debug, Clone)]
pub struct CompositeStrategy {
    strategies: Vec<Arc<dyn AuthStrategy>>,
}

impl CompositeStrategy {
    /// Creates a composite over `strategies`, tried in order.
    pub fn new(strategies: Vec<Arc<dyn AuthStrategy>>) -> Self {
        Self { strategies }
    }
}

fn specificity(failure: &AuthFailure) -> u8 {
    match failure {
        AuthFailure::Missing => 0,
        AuthFailure::Malformed(_) => 1,
        AuthFailure::InvalidSignature => 2,
        AuthFailure::WrongTokenType => 3,
        AuthFailure::Expired => 4,
        AuthFailure::Revoked => 5,
        AuthFailure::Forbidden(_) => 6,
    }
}

#[async_trait]
impl AuthStrategy for CompositeStrategy {
    fn name(&self) -> &'static str {
        "composite"
    }

    async fn authenticate(&self, credentials: &str) -> Result<Principal, AuthFailure> {
        let mut best: Option<AuthFailure> = None;

        for strategy in &self.strategies {
            match strategy.authenticate(credentials).await {
                Ok(principal) => return Ok(principal),
                Err(failure) => {
                    tracing::trace!(strategy = strategy.name(), reason = failure.reason(), "Strategy refused credential");
                    if best
                        .as_ref()
                        .map_or(true, |current| specificity(&failure) > specificity(current))
                    {
                        best = Some(failure);
                    }
                }
            }
        }

        Err(best.unwrap_or(AuthFailure::Missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::NullStrategy;
    use tableside_core::types::Role;

    #[derive(Debug)]
    struct Refuse(AuthFailure);

    #[async_trait]
    impl AuthStrategy for Refuse {
        fn name(&self) -> &'static str {
            "refuse"
        }

        async fn authenticate(&self, _credentials: &str) -> Result<Principal, AuthFailure> {
            Err(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let composite = CompositeStrategy::new(vec![
            Arc::new(Refuse(AuthFailure::InvalidSignature)),
            Arc::new(NullStrategy::staff(Role::Kitchen, 1, vec![5])),
        ]);
        let principal = composite.authenticate("anything").await.unwrap();
        assert_eq!(principal.role, Role::Kitchen);
    }

    #[tokio::test]
    async fn test_most_specific_failure_reported() {
        let composite = CompositeStrategy::new(vec![
            Arc::new(Refuse(AuthFailure::Expired)),
            Arc::new(Refuse(AuthFailure::Malformed("x".to_string()))),
        ]);
        assert_eq!(
            composite.authenticate("tok").await.unwrap_err(),
            AuthFailure::Expired
        );
    }

    #[tokio::test]
    async fn test_empty_composite_refuses() {
        let composite = CompositeStrategy::new(Vec::new());
        assert_eq!(
            composite.authenticate("tok").await.unwrap_err(),
            AuthFailure::Missing
        );
    }
}
