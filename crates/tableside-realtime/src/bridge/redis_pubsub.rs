//! Redis pub/sub bus for multi-node deployments.

#[cfg(feature = "redis-pubsub")]
pub mod implementation {
    use async_trait::async_trait;
    use futures::{FutureExt, StreamExt};
    use tracing::{debug, info};

    use tableside_core::error::{AppError, ErrorKind};
    use tableside_core::result::AppResult;

    use crate::bridge::bus::{BusKeepalive, BusSubscription, EventBus};

    /// Redis pub/sub bus.
    ///
    /// Each subscription owns a dedicated pub/sub connection; when Redis drops
    /// it the payload stream ends and the subscriber reconnects. A connection
    /// that goes half-open is caught by the keepalive, which sends `PING`
    /// over the same pub/sub connection.
    #[derive(Debug, Clone)]
    pub struct RedisPubSubBridge {
        client: redis::Client,
        masked_url: String,
    }

    impl RedisPubSubBridge {
        /// Creates a bridge for `url`. Does not connect yet.
        pub fn new(url: &str) -> AppResult<Self> {
            let client = redis::Client::open(url).map_err(|e| {
                AppError::with_source(ErrorKind::Configuration, "Invalid Redis URL", e)
            })?;
            Ok(Self {
                client,
                masked_url: mask_redis_url(url),
            })
        }

        /// Underlying client, for sharing with other Redis-backed components.
        pub fn client(&self) -> &redis::Client {
            &self.client
        }
    }

    #[async_trait]
    impl EventBus for RedisPubSubBridge {
        fn name(&self) -> &'static str {
            "redis"
        }

        async fn subscribe(&self, channels: &[String]) -> AppResult<BusSubscription> {
            debug!(url = %self.masked_url, ?channels, "Opening Redis pub/sub connection");
            let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
                AppError::with_source(ErrorKind::ExternalService, "Redis pub/sub connection failed", e)
            })?;

            for channel in channels {
                pubsub.subscribe(channel).await.map_err(|e| {
                    AppError::with_source(
                        ErrorKind::ExternalService,
                        format!("Redis SUBSCRIBE {channel} failed"),
                        e,
                    )
                })?;
            }
            info!(url = %self.masked_url, count = channels.len(), "Subscribed to Redis channels");

            let (sink, stream) = pubsub.split();
            let messages = stream
                .map(|msg| {
                    msg.get_payload::<String>().map_err(|e| {
                        AppError::with_source(ErrorKind::ExternalService, "Undecodable Redis payload", e)
                    })
                })
                .boxed();

            let keepalive: BusKeepalive = Box::new(move || {
                let mut sink = sink.clone();
                async move {
                    sink.ping::<redis::Value>().await.map(|_| ()).map_err(|e| {
                        AppError::with_source(ErrorKind::ExternalService, "Redis pub/sub PING failed", e)
                    })
                }
                .boxed()
            });
            Ok(BusSubscription::new(messages).with_keepalive(keepalive))
        }

        async fn publish(&self, channel: &str, payload: &str) -> AppResult<()> {
            let mut conn = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::ExternalService, "Redis connection failed", e)
                })?;

            redis::cmd("PUBLISH")
                .arg(channel)
                .arg(payload)
                .query_async::<i64>(&mut conn)
                .await
                .map_err(|e| AppError::with_source(ErrorKind::ExternalService, "Redis PUBLISH failed", e))?;

            Ok(())
        }
    }

    /// Mask password in Redis URL for safe logging.
    pub fn mask_redis_url(url: &str) -> String {
        if let Some(at_pos) = url.find('@') {
            if let Some(colon_pos) = url[..at_pos].rfind(':') {
                let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
                if colon_pos > scheme_end {
                    return format!("{}:****@{}", &url[..colon_pos], &url[at_pos + 1..]);
                }
            }
        }
        url.to_string()
    }

}

#[cfg(not(feature = "redis-pubsub"))]
pub mod implementation {
    use async_trait::async_trait;

    use tableside_core::error::AppError;
    use tableside_core::result::AppResult;

    use crate::bridge::bus::{BusSubscription, EventBus};

    /// Stub Redis bus when the redis feature is disabled.
    #[derive(Debug, Clone)]
    pub struct RedisPubSubBridge;

    impl RedisPubSubBridge {
        /// Always fails: the gateway was built without Redis support.
        pub fn new(_url: &str) -> AppResult<Self> {
            Err(AppError::configuration(
                "Redis bus requested but the redis-pubsub feature is disabled",
            ))
        }
    }

    #[async_trait]
    impl EventBus for RedisPubSubBridge {
        fn name(&self) -> &'static str {
            "redis"
        }

        async fn subscribe(&self, _channels: &[String]) -> AppResult<BusSubscription> {
            Err(AppError::configuration("redis-pubsub feature is disabled"))
        }

        async fn publish(&self, _channel: &str, _payload: &str) -> AppResult<()> {
            Err(AppError::configuration("redis-pubsub feature is disabled"))
        }
    }
}

pub use implementation::RedisPubSubBridge;
