//! Event bus bridge: bus transports, the resilient upstream subscriber and
//! its circuit breaker, backoff and drop-rate tracking.

pub mod backoff;
pub mod bus;
pub mod circuit_breaker;
pub mod drop_rate;
pub mod memory_pubsub;
pub mod redis_pubsub;
pub mod subscriber;

pub use bus::{BusKeepalive, BusStream, BusSubscription, EventBus};
pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitState};
pub use memory_pubsub::MemoryPubSub;
pub use redis_pubsub::RedisPubSubBridge;
pub use subscriber::UpstreamSubscriber;
