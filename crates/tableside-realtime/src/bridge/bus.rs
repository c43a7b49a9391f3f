//! Event bus abstraction.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use tableside_core::result::AppResult;

/// Raw payloads received from a subscription. An `Err` item or the end of
/// the stream means the subscription is lost.
pub type BusStream = BoxStream<'static, AppResult<String>>;

/// Liveness check for one subscription's underlying connection.
///
/// Each call issues one ping; the future resolves once the peer answers.
pub type BusKeepalive = Box<dyn FnMut() -> BoxFuture<'static, AppResult<()>> + Send>;

/// An open subscription: the payload stream plus an optional keepalive.
///
/// Transports that cannot lose their peer silently (in-process channels)
/// carry no keepalive.
pub struct BusSubscription {
    /// Merged payload stream for every subscribed channel.
    pub messages: BusStream,
    /// Ping over the same connection the payloads arrive on.
    pub keepalive: Option<BusKeepalive>,
}

impl BusSubscription {
    /// A subscription without keepalive.
    pub fn new(messages: BusStream) -> Self {
        Self {
            messages,
            keepalive: None,
        }
    }

    /// Attach a keepalive.
    pub fn with_keepalive(mut self, keepalive: BusKeepalive) -> Self {
        self.keepalive = Some(keepalive);
        self
    }
}

impl std::fmt::Debug for BusSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSubscription")
            .field("keepalive", &self.keepalive.is_some())
            .finish_non_exhaustive()
    }
}

/// A publish/subscribe transport carrying JSON event envelopes.
#[async_trait]
pub trait EventBus: Send + Sync + std::fmt::Debug + 'static {
    /// Short transport name for logs.
    fn name(&self) -> &'static str;

    /// Subscribe to `channels`, returning one merged subscription.
    async fn subscribe(&self, channels: &[String]) -> AppResult<BusSubscription>;

    /// Publish a raw payload to `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()>;
}
