//! Resilient upstream subscription.
//!
//! Subscribes to the configured bus channels and forwards every valid event
//! to a handler. Bus I/O goes through the circuit breaker; after a failure
//! the loop sleeps for a decorrelated-jitter delay (or the breaker's
//! remaining cooldown) before trying again. Invalid payloads are counted
//! and dropped without ending the subscription. Subscriptions that carry a
//! keepalive are pinged periodically; a ping that fails or misses its
//! deadline ends the subscription like any other bus failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tableside_core::config::BusConfig;
use tableside_core::error::{AppError, ErrorKind};
use tableside_core::events::InboundEvent;

use super::backoff::DecorrelatedJitter;
use super::bus::{BusKeepalive, BusSubscription, EventBus};
use super::circuit_breaker::{BreakerError, CircuitBreaker};
use super::drop_rate::DropRateTracker;
use crate::metrics::GatewayMetrics;

enum StreamEnd {
    Cancelled,
    Failed(AppError),
    Closed,
}

/// Long-running consumer of the upstream event bus.
#[derive(Debug)]
pub struct UpstreamSubscriber {
    bus: Arc<dyn EventBus>,
    breaker: Arc<CircuitBreaker>,
    drop_rate: Arc<DropRateTracker>,
    metrics: Arc<GatewayMetrics>,
    config: BusConfig,
}

impl UpstreamSubscriber {
    /// Create a subscriber over `bus`.
    pub fn new(
        bus: Arc<dyn EventBus>,
        breaker: Arc<CircuitBreaker>,
        drop_rate: Arc<DropRateTracker>,
        metrics: Arc<GatewayMetrics>,
        config: BusConfig,
    ) -> Self {
        Self {
            bus,
            breaker,
            drop_rate,
            metrics,
            config,
        }
    }

    /// The breaker guarding bus I/O.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// The drop-rate tracker.
    pub fn drop_rate(&self) -> &Arc<DropRateTracker> {
        &self.drop_rate
    }

    /// Consume the bus until `shutdown` is cancelled.
    ///
    /// `on_event` is awaited for each valid event before the next payload is
    /// read, so events from one subscription are handled in bus order.
    pub async fn run<F, Fut>(&self, shutdown: CancellationToken, on_event: F)
    where
        F: Fn(Arc<InboundEvent>) -> Fut + Send + Sync,
        Fut: Future<Output = ()> + Send,
    {
        let mut backoff = DecorrelatedJitter::new(&self.config.retry);
        let channels = self.config.channels.clone();
        info!(bus = self.bus.name(), ?channels, "Upstream subscriber starting");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let connect_timeout = self.config.connect_timeout();
            let attempt = self
                .breaker
                .call(|| async {
                    tokio::time::timeout(connect_timeout, self.bus.subscribe(&channels))
                        .await
                        .unwrap_or_else(|elapsed| Err(AppError::from(elapsed)))
                })
                .await;

            let subscription = match attempt {
                Ok(subscription) => {
                    backoff.reset();
                    info!(bus = self.bus.name(), "Subscribed to event bus");
                    subscription
                }
                Err(BreakerError::Open { retry_in }) => {
                    debug!(retry_in_ms = retry_in.as_millis() as u64, "Bus circuit open, waiting");
                    if !sleep_or_cancel(retry_in, &shutdown).await {
                        break;
                    }
                    continue;
                }
                Err(BreakerError::Inner(e)) if e.is_transient() => {
                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Event bus subscribe failed"
                    );
                    if !sleep_or_cancel(delay, &shutdown).await {
                        break;
                    }
                    continue;
                }
                Err(BreakerError::Inner(e)) => {
                    // Retrying soon will not fix a misconfigured bus.
                    let delay = backoff.ceiling();
                    error!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Event bus subscribe failed permanently"
                    );
                    if !sleep_or_cancel(delay, &shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            match self.consume(subscription, &shutdown, &on_event).await {
                StreamEnd::Cancelled => break,
                StreamEnd::Failed(e) => {
                    self.breaker.record_failure();
                    error!(error = %e, "Event bus subscription failed");
                }
                StreamEnd::Closed => {
                    self.breaker.record_failure();
                    warn!("Event bus subscription closed by peer");
                }
            }

            let delay = backoff.next_delay();
            if !sleep_or_cancel(delay, &shutdown).await {
                break;
            }
        }

        info!("Upstream subscriber stopped");
    }

    async fn consume<F, Fut>(
        &self,
        subscription: BusSubscription,
        shutdown: &CancellationToken,
        on_event: &F,
    ) -> StreamEnd
    where
        F: Fn(Arc<InboundEvent>) -> Fut + Send + Sync,
        Fut: Future<Output = ()> + Send,
    {
        let BusSubscription {
            mut messages,
            mut keepalive,
        } = subscription;
        let mut ticks = keepalive
            .as_ref()
            .and(self.config.keepalive_interval())
            .map(|period| {
                let mut ticks = interval_at(Instant::now() + period, period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticks
            });

        loop {
            let item = tokio::select! {
                () = shutdown.cancelled() => return StreamEnd::Cancelled,
                () = next_tick(&mut ticks) => {
                    if let Some(ping) = keepalive.as_mut() {
                        if let Some(end) = self.ping(ping, shutdown).await {
                            return end;
                        }
                    }
                    continue;
                }
                item = messages.next() => item,
            };

            match item {
                Some(Ok(raw)) => {
                    self.breaker.record_success();
                    if let Some(event) = self.accept(&raw) {
                        on_event(event).await;
                    }
                }
                Some(Err(e)) => return StreamEnd::Failed(e),
                None => return StreamEnd::Closed,
            }
        }
    }

    /// One keepalive round trip; `Some` when the subscription must end.
    async fn ping(&self, ping: &mut BusKeepalive, shutdown: &CancellationToken) -> Option<StreamEnd> {
        let deadline = self.config.keepalive_timeout();
        let outcome = tokio::select! {
            () = shutdown.cancelled() => return Some(StreamEnd::Cancelled),
            outcome = tokio::time::timeout(deadline, ping()) => outcome,
        };
        match outcome {
            Ok(Ok(())) => {
                debug!(bus = self.bus.name(), "Event bus keepalive answered");
                None
            }
            Ok(Err(e)) => Some(StreamEnd::Failed(e)),
            Err(elapsed) => Some(StreamEnd::Failed(AppError::with_source(
                ErrorKind::Timeout,
                format!("Event bus keepalive unanswered after {}ms", deadline.as_millis()),
                elapsed,
            ))),
        }
    }

    /// Validate one raw payload, counting it as dropped when invalid.
    pub fn accept(&self, raw: &str) -> Option<Arc<InboundEvent>> {
        self.metrics.inc_event_received();
        match InboundEvent::parse(raw) {
            Ok(event) => Some(Arc::new(event)),
            Err(e) => {
                self.metrics.inc_event_invalid();
                self.drop_rate.record_drop();
                warn!(error = %e, bytes = raw.len(), "Dropped invalid event from bus");
                None
            }
        }
    }
}

/// Next keepalive tick; never resolves when keepalive is off.
async fn next_tick(ticks: &mut Option<Interval>) {
    match ticks {
        Some(ticks) => {
            ticks.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Sleep for `delay`; `false` if shutdown fired first.
async fn sleep_or_cancel(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = shutdown.cancelled() => false,
    }
}
