//! Redis-backed sector assignments.
//!
//! The backend keeps each waiter's assignments in a set at
//! `{prefix}sectors:{tenant_id}:{user_id}`.

#[cfg(feature = "redis-pubsub")]
pub mod implementation {
    use async_trait::async_trait;
    use redis::aio::ConnectionManager;
    use tracing::info;

    use tableside_core::error::{AppError, ErrorKind};
    use tableside_core::result::AppResult;
    use tableside_core::traits::SectorLookup;
    use tableside_core::types::{SectorId, TenantId, UserId};

    use crate::bridge::redis_pubsub::implementation::mask_redis_url;

    /// Reads sector assignments with `SMEMBERS`.
    #[derive(Clone)]
    pub struct RedisSectorLookup {
        conn: ConnectionManager,
        key_prefix: String,
    }

    impl std::fmt::Debug for RedisSectorLookup {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RedisSectorLookup")
                .field("key_prefix", &self.key_prefix)
                .finish()
        }
    }

    impl RedisSectorLookup {
        /// Connect to Redis at `url`.
        pub async fn connect(url: &str, key_prefix: &str) -> AppResult<Self> {
            info!(url = %mask_redis_url(url), "Connecting sector lookup to Redis");
            let client = redis::Client::open(url).map_err(|e| {
                AppError::with_source(ErrorKind::Configuration, "Invalid Redis URL", e)
            })?;
            let conn = ConnectionManager::new(client).await.map_err(|e| {
                AppError::with_source(ErrorKind::ExternalService, "Failed to connect to Redis", e)
            })?;
            Ok(Self {
                conn,
                key_prefix: key_prefix.to_string(),
            })
        }

        /// Key holding a user's sector set.
        pub fn key(&self, tenant_id: TenantId, user_id: UserId) -> String {
            format!("{}sectors:{tenant_id}:{user_id}", self.key_prefix)
        }
    }

    #[async_trait]
    impl SectorLookup for RedisSectorLookup {
        async fn get_sectors(&self, user_id: UserId, tenant_id: TenantId) -> AppResult<Vec<SectorId>> {
            let mut conn = self.conn.clone();
            let mut sectors: Vec<SectorId> = redis::cmd("SMEMBERS")
                .arg(self.key(tenant_id, user_id))
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::ExternalService, "Sector lookup failed", e)
                })?;
            sectors.sort_unstable();
            Ok(sectors)
        }
    }
}

#[cfg(not(feature = "redis-pubsub"))]
pub mod implementation {
    use async_trait::async_trait;

    use tableside_core::error::AppError;
    use tableside_core::result::AppResult;
    use tableside_core::traits::SectorLookup;
    use tableside_core::types::{SectorId, TenantId, UserId};

    /// Stub when the redis feature is disabled.
    #[derive(Debug, Clone)]
    pub struct RedisSectorLookup;

    impl RedisSectorLookup {
        /// Always fails: the gateway was built without Redis support.
        pub async fn connect(_url: &str, _key_prefix: &str) -> AppResult<Self> {
            Err(AppError::configuration(
                "Redis sector lookup requested but the redis-pubsub feature is disabled",
            ))
        }
    }

    #[async_trait]
    impl SectorLookup for RedisSectorLookup {
        async fn get_sectors(&self, _user_id: UserId, _tenant_id: TenantId) -> AppResult<Vec<SectorId>> {
            Err(AppError::configuration("redis-pubsub feature is disabled"))
        }
    }
}

pub use implementation::RedisSectorLookup;
