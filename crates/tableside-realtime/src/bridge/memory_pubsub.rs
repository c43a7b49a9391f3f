//! In-memory pub/sub for single-node deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio::sync::RwLock;
use tokio::sync::broadcast;
use tracing::warn;

use tableside_core::result::AppResult;

use super::bus::{BusStream, BusSubscription, EventBus};

/// In-memory pub/sub implementation.
#[derive(Debug)]
pub struct MemoryPubSub {
    /// Channel name → broadcast sender
    channels: RwLock<HashMap<String, broadcast::Sender<String>>>,
    /// Buffer size for channels
    buffer_size: usize,
}

impl MemoryPubSub {
    /// Create a new in-memory pub/sub
    pub fn new(buffer_size: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            buffer_size,
        }
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer_size.max(1)).0)
            .clone()
    }

    /// Active subscribers on a channel.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn receiver_stream(channel: String, rx: broadcast::Receiver<String>) -> BusStream {
    stream::unfold((channel, rx), |(channel, mut rx)| async move {
        loop {
            match rx.recv().await {
                Ok(payload) => return Some((Ok(payload), (channel, rx))),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %channel, skipped, "Memory bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

#[async_trait]
impl EventBus for MemoryPubSub {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn subscribe(&self, channels: &[String]) -> AppResult<BusSubscription> {
        let mut streams = Vec::with_capacity(channels.len());
        for channel in channels {
            let rx = self.sender(channel).await.subscribe();
            streams.push(receiver_stream(channel.clone(), rx));
        }
        Ok(BusSubscription::new(stream::select_all(streams).boxed()))
    }

    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()> {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(channel) {
            // No receivers is not an error: the event simply has no audience.
            let _ = tx.send(payload.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_merged_subscription() {
        let bus = MemoryPubSub::new(16);
        let subscription = bus
            .subscribe(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert!(subscription.keepalive.is_none());
        let mut stream = subscription.messages;
        assert_eq!(bus.subscriber_count("a").await, 1);

        bus.publish("a", "one").await.unwrap();
        bus.publish("b", "two").await.unwrap();
        bus.publish("c", "ignored").await.unwrap();

        let mut got = vec![
            stream.next().await.unwrap().unwrap(),
            stream.next().await.unwrap().unwrap(),
        ];
        got.sort();
        assert_eq!(got, vec!["one".to_string(), "two".to_string()]);
    }
}
