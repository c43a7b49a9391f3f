//! Top-level real-time engine that ties together all subsystems.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use tableside_auth::AuthStrategy;
use tableside_core::config::{BusConfig, RealtimeConfig};
use tableside_core::error::AppError;
use tableside_core::traits::SectorLookup;
use tableside_core::types::ConnectionId;

use crate::bridge::bus::EventBus;
use crate::bridge::circuit_breaker::CircuitBreaker;
use crate::bridge::drop_rate::DropRateTracker;
use crate::bridge::subscriber::UpstreamSubscriber;
use crate::broadcast::router::BroadcastRouter;
use crate::connection::handle::{Outbound, OutboundLink};
use crate::connection::heartbeat::HeartbeatTracker;
use crate::connection::lock::LockManager;
use crate::connection::rate_limit::RateLimiter;
use crate::connection::registry::{ConnectionRegistry, RegistryLimits};
use crate::message::close_code::CloseCode;
use crate::metrics::connections::record_disconnect;
use crate::metrics::{EngineGauges, GatewayMetrics, render_prometheus};
use crate::session::endpoint::EndpointKind;
use crate::session::lifecycle::EndpointSession;

/// Collaborators supplied by the binary.
#[derive(Debug, Clone)]
pub struct EngineDeps {
    /// Upstream event bus.
    pub bus: Arc<dyn EventBus>,
    /// Waiter sector assignments.
    pub sector_lookup: Arc<dyn SectorLookup>,
    /// Strategy for the staff endpoints.
    pub staff_auth: Arc<dyn AuthStrategy>,
    /// Strategy for the diner endpoint.
    pub diner_auth: Arc<dyn AuthStrategy>,
}

/// Central real-time engine that coordinates all WebSocket subsystems.
pub struct RealtimeEngine {
    config: RealtimeConfig,
    locks: Arc<LockManager>,
    registry: Arc<ConnectionRegistry>,
    heartbeat: Arc<HeartbeatTracker>,
    rate_limiter: Arc<RateLimiter>,
    router: Arc<BroadcastRouter>,
    subscriber: Arc<UpstreamSubscriber>,
    metrics: Arc<GatewayMetrics>,
    sector_lookup: Arc<dyn SectorLookup>,
    staff_auth: Arc<dyn AuthStrategy>,
    diner_auth: Arc<dyn AuthStrategy>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl std::fmt::Debug for RealtimeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeEngine")
            .field("connections", &self.registry.connection_count())
            .field("breaker", &self.subscriber.breaker().state())
            .finish()
    }
}

impl RealtimeEngine {
    /// Creates a new real-time engine with all subsystems.
    pub fn new(config: RealtimeConfig, bus_config: BusConfig, deps: EngineDeps) -> Self {
        let metrics = Arc::new(GatewayMetrics::new());
        let locks = Arc::new(LockManager::new(config.locks.clone()));
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::clone(&locks),
            RegistryLimits {
                max_per_user: config.max_connections_per_user,
                max_per_branch: config.max_connections_per_branch,
            },
        ));
        let heartbeat = Arc::new(HeartbeatTracker::new(
            Arc::clone(&locks),
            Arc::clone(&registry),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_messages,
            config.rate_limit_window(),
        ));
        let router = Arc::new(
            BroadcastRouter::new(
                Arc::clone(&registry),
                Arc::clone(&heartbeat),
                config.broadcast.clone(),
            )
            .with_observer(metrics.clone()),
        );
        let subscriber = Arc::new(UpstreamSubscriber::new(
            deps.bus,
            Arc::new(CircuitBreaker::new("event-bus", bus_config.breaker.clone())),
            Arc::new(DropRateTracker::new(
                bus_config.drop_alert_threshold,
                bus_config.drop_window(),
            )),
            Arc::clone(&metrics),
            bus_config,
        ));

        info!("Real-time engine initialized");

        Self {
            config,
            locks,
            registry,
            heartbeat,
            rate_limiter,
            router,
            subscriber,
            metrics,
            sector_lookup: deps.sector_lookup,
            staff_auth: deps.staff_auth,
            diner_auth: deps.diner_auth,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Heartbeat tracker.
    pub fn heartbeat(&self) -> &Arc<HeartbeatTracker> {
        &self.heartbeat
    }

    /// Per-connection rate limiter.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Broadcast router.
    pub fn router(&self) -> &Arc<BroadcastRouter> {
        &self.router
    }

    /// Upstream subscriber.
    pub fn subscriber(&self) -> &Arc<UpstreamSubscriber> {
        &self.subscriber
    }

    /// Metrics counters.
    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// Sector lookup.
    pub fn sector_lookup(&self) -> &Arc<dyn SectorLookup> {
        &self.sector_lookup
    }

    /// Strategy used to authenticate connections on `kind`.
    pub fn strategy_for(&self, kind: EndpointKind) -> Arc<dyn AuthStrategy> {
        match kind {
            EndpointKind::Diner => Arc::clone(&self.diner_auth),
            EndpointKind::Waiter | EndpointKind::Kitchen | EndpointKind::Admin => {
                Arc::clone(&self.staff_auth)
            }
        }
    }

    /// Whether the engine accepts new connections.
    pub fn is_accepting(&self) -> bool {
        self.registry.is_accepting()
    }

    /// Create a session for a new connection on `kind`, plus the outbound
    /// half the transport's writer drains.
    pub fn open_session(self: &Arc<Self>, kind: EndpointKind) -> (EndpointSession, Outbound) {
        let (link, outbound) = OutboundLink::channel(self.config.outbound_buffer_size);
        (EndpointSession::new(Arc::clone(self), kind, link), outbound)
    }

    /// Start the upstream subscriber and the stale-connection sweeper.
    pub fn start(self: &Arc<Self>) {
        let subscriber = Arc::clone(&self.subscriber);
        let router = Arc::clone(&self.router);
        let metrics = Arc::clone(&self.metrics);
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            subscriber
                .run(shutdown, move |event| {
                    let router = Arc::clone(&router);
                    let metrics = Arc::clone(&metrics);
                    async move {
                        if let Err(e) = router.route_event(event).await {
                            metrics.inc_route_failed();
                            warn!(error = %e, "Failed to route event");
                        }
                    }
                })
                .await;
        });

        let engine = Arc::clone(self);
        self.tasks.spawn(async move { engine.run_sweeper().await });

        info!("Real-time engine started");
    }

    async fn run_sweeper(&self) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_stale().await;
                }
            }
        }
        debug!("Stale-connection sweeper stopped");
    }

    /// Evict stale connections once and close their sockets with 1001.
    ///
    /// Returns how many connections were evicted.
    pub async fn sweep_stale(&self) -> usize {
        let evicted = match self
            .heartbeat
            .cleanup_stale(self.config.heartbeat_timeout())
            .await
        {
            Ok(evicted) => evicted,
            Err(e) => {
                warn!(error = %e, "Stale-connection sweep failed");
                return 0;
            }
        };

        for handle in &evicted {
            self.rate_limiter.remove(&handle.id);
            handle.close(CloseCode::GoingAway, "heartbeat timeout");
        }
        self.metrics.add_stale_evictions(evicted.len());
        evicted.len()
    }

    /// Remove every trace of a connection. Idempotent.
    pub(crate) async fn release_connection(&self, id: &ConnectionId) {
        if let Err(e) = self.registry.unregister(id).await {
            warn!(conn_id = %id, error = %e, "Failed to unregister connection");
        }
        self.heartbeat.forget(id);
        self.rate_limiter.remove(id);
        record_disconnect(&self.metrics);
    }

    /// Point-in-time gauges for health and metrics.
    pub fn gauges(&self) -> EngineGauges {
        let breaker = self.subscriber.breaker().stats();
        EngineGauges {
            registry: self.registry.stats(),
            breaker_state: breaker.state.gauge(),
            breaker_opened_total: breaker.times_opened,
            drop_rate_recent: self.subscriber.drop_rate().recent(),
            drop_rate_alert: self.subscriber.drop_rate().is_alerting(),
            lock_cache_size: self.locks.cached(),
            broadcasts_in_flight: self.router.in_flight(),
        }
    }

    /// Metrics in the Prometheus text format.
    pub fn render_metrics(&self) -> String {
        render_prometheus(&self.metrics.snapshot(), &self.gauges())
    }

    /// Initiates a graceful shutdown of the real-time engine.
    ///
    /// Stops accepting connections, waits (bounded) for in-flight
    /// broadcasts, stops the subscriber and sweeper, then unregisters and
    /// closes every connection with 1001.
    pub async fn shutdown(&self) -> Result<(), AppError> {
        info!("Shutting down real-time engine");

        self.registry.stop_accepting();

        self.router.close();
        let drain = self.config.shutdown_drain();
        if !self.router.drain(drain).await {
            warn!(
                in_flight = self.router.in_flight(),
                "Broadcasts still running after drain deadline"
            );
        }

        self.shutdown.cancel();
        self.tasks.close();
        if tokio::time::timeout(drain.max(Duration::from_secs(1)), self.tasks.wait())
            .await
            .is_err()
        {
            warn!("Background tasks did not stop before the deadline");
        }

        let closed = self.registry.drain().await;
        for handle in &closed {
            self.heartbeat.forget(&handle.id);
            self.rate_limiter.remove(&handle.id);
            handle.close(CloseCode::GoingAway, "server shutting down");
        }

        info!(closed = closed.len(), "Real-time engine shut down");
        Ok(())
    }
}
