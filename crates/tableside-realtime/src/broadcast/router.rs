//! Broadcast router: resolves a scope to connections and fans out.

use std::ops::AddAssign;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use tableside_core::config::BroadcastConfig;
use tableside_core::error::AppError;
use tableside_core::events::InboundEvent;
use tableside_core::result::AppResult;

use super::observer::{BroadcastContext, BroadcastObserver};
use super::scope::BroadcastScope;
use crate::connection::handle::{ConnectionHandle, OutboundFrame};
use crate::connection::heartbeat::HeartbeatTracker;
use crate::connection::rate_limit::SlidingWindow;
use crate::connection::registry::ConnectionRegistry;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections the payload was queued for.
    pub sent: usize,
    /// Connections whose send failed or timed out.
    pub failed: usize,
}

impl BroadcastReport {
    /// Total connections targeted.
    pub fn targeted(&self) -> usize {
        self.sent + self.failed
    }
}

impl AddAssign for BroadcastReport {
    fn add_assign(&mut self, rhs: Self) {
        self.sent += rhs.sent;
        self.failed += rhs.failed;
    }
}

/// Resolves broadcast scopes against the registry and delivers payloads in
/// bounded concurrent batches.
#[derive(Debug)]
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
    heartbeat: Arc<HeartbeatTracker>,
    config: BroadcastConfig,
    observers: Vec<Arc<dyn BroadcastObserver>>,
    window: Mutex<SlidingWindow>,
    closing: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl BroadcastRouter {
    /// Create a router over `registry`.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        heartbeat: Arc<HeartbeatTracker>,
        config: BroadcastConfig,
    ) -> Self {
        let window = SlidingWindow::new(config.max_broadcasts_per_second, Duration::from_secs(1));
        Self {
            registry,
            heartbeat,
            config,
            observers: Vec::new(),
            window: Mutex::new(window),
            closing: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    /// Attach an observer.
    pub fn with_observer(mut self, observer: Arc<dyn BroadcastObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Deliver `payload` to every connection in `scope`.
    ///
    /// An empty scope yields a zero report. Individual send failures are
    /// counted and flag the connection stale; they never fail the call.
    pub async fn broadcast(
        &self,
        scope: BroadcastScope,
        payload: OutboundFrame,
    ) -> AppResult<BroadcastReport> {
        self.dispatch(scope, &payload, None).await
    }

    /// Route a bus event to its audience.
    ///
    /// Events carrying a sector go to that sector and, with the branch
    /// fallback, to branch staff without sector assignments. Others to the whole branch. Events carrying a table
    /// session are additionally delivered to that session's diners.
    pub async fn route_event(&self, event: Arc<InboundEvent>) -> AppResult<BroadcastReport> {
        let payload: OutboundFrame = Arc::from(event.to_client_json()?);
        let event_type = Some(event.event_type());

        let primary = match event.sector_id() {
            Some(sector_id) => BroadcastScope::Sector {
                tenant_id: event.tenant_id(),
                branch_id: event.branch_id(),
                sector_id,
            },
            None => BroadcastScope::Branch {
                tenant_id: event.tenant_id(),
                branch_id: event.branch_id(),
            },
        };
        let mut report = self.dispatch(primary, &payload, event_type).await?;

        if let Some(session_id) = event.session_id() {
            let scope = BroadcastScope::Session {
                tenant_id: event.tenant_id(),
                session_id,
            };
            report += self.dispatch(scope, &payload, event_type).await?;
        }

        debug!(
            event_type = event.event_type(),
            tenant_id = event.tenant_id(),
            branch_id = event.branch_id(),
            sent = report.sent,
            failed = report.failed,
            "Event routed"
        );
        Ok(report)
    }

    async fn dispatch(
        &self,
        scope: BroadcastScope,
        payload: &OutboundFrame,
        event_type: Option<&str>,
    ) -> AppResult<BroadcastReport> {
        let ctx = BroadcastContext {
            scope: &scope,
            event_type,
        };

        let _in_flight = InFlight::enter(self);
        if self.closing.load(Ordering::SeqCst) {
            return Err(AppError::service_unavailable("Broadcast router is shutting down"));
        }

        let allowed = self.window.lock().await.try_acquire(Instant::now());
        if !allowed {
            for observer in &self.observers {
                observer.on_rate_limited(&ctx);
            }
            warn!(scope = %scope, "Broadcast rejected by rate limit");
            return Err(AppError::rate_limited(format!(
                "More than {} broadcasts per second",
                self.config.max_broadcasts_per_second
            )));
        }

        let targets = self.resolve(&scope).await?;
        let report = self.deliver(&targets, payload).await;

        for observer in &self.observers {
            observer.on_broadcast(&report, &ctx);
        }
        Ok(report)
    }

    async fn resolve(&self, scope: &BroadcastScope) -> AppResult<Vec<Arc<ConnectionHandle>>> {
        match *scope {
            BroadcastScope::Branch { tenant_id, branch_id } => {
                self.registry.branch_targets(tenant_id, branch_id).await
            }
            BroadcastScope::Sector {
                tenant_id,
                branch_id,
                sector_id,
            } => {
                self.registry
                    .sector_targets(
                        tenant_id,
                        branch_id,
                        sector_id,
                        self.config.sector_fallback_to_branch,
                    )
                    .await
            }
            BroadcastScope::Session {
                tenant_id,
                session_id,
            } => self.registry.session_targets(tenant_id, session_id).await,
            BroadcastScope::User { tenant_id, user_id } => {
                self.registry.user_targets(tenant_id, user_id).await
            }
        }
    }

    async fn deliver(
        &self,
        targets: &[Arc<ConnectionHandle>],
        payload: &OutboundFrame,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let timeout = self.config.send_timeout();

        for batch in targets.chunks(self.config.batch_size.max(1)) {
            let results = join_all(batch.iter().map(|handle| {
                let payload = Arc::clone(payload);
                async move { (handle, handle.send(payload, timeout).await) }
            }))
            .await;

            for (handle, result) in results {
                match result {
                    Ok(()) => report.sent += 1,
                    Err(e) => {
                        report.failed += 1;
                        self.heartbeat.flag_stale(&handle.id);
                        debug!(conn_id = %handle.id, error = %e, "Broadcast delivery failed");
                    }
                }
            }
        }
        report
    }

    /// Refuse new broadcasts. In-flight ones run to completion.
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    /// Broadcasts currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no broadcast is in flight, up to `timeout`.
    ///
    /// Returns `false` if broadcasts were still running at the deadline.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

struct InFlight<'a> {
    router: &'a BroadcastRouter,
}

impl<'a> InFlight<'a> {
    fn enter(router: &'a BroadcastRouter) -> Self {
        router.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { router }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.router.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.router.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::handle::test_support::{diner_handle, staff_handle};
    use crate::connection::lock::LockManager;
    use crate::connection::registry::RegistryLimits;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tableside_core::config::LockConfig;
    use tableside_core::error::ErrorKind;
    use tableside_core::types::Role;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        heartbeat: Arc<HeartbeatTracker>,
    }

    fn fixture() -> Fixture {
        let locks = Arc::new(LockManager::new(LockConfig::default()));
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::clone(&locks),
            RegistryLimits {
                max_per_user: 1000,
                max_per_branch: 1000,
            },
        ));
        let heartbeat = Arc::new(HeartbeatTracker::new(locks, Arc::clone(&registry)));
        Fixture { registry, heartbeat }
    }

    fn router(f: &Fixture, config: BroadcastConfig) -> BroadcastRouter {
        BroadcastRouter::new(Arc::clone(&f.registry), Arc::clone(&f.heartbeat), config)
    }

    fn event(value: serde_json::Value) -> Arc<InboundEvent> {
        Arc::new(InboundEvent::from_value(value).unwrap())
    }

    #[derive(Debug, Default)]
    struct Counting {
        broadcasts: AtomicUsize,
        rejected: AtomicUsize,
    }

    impl BroadcastObserver for Counting {
        fn on_broadcast(&self, _report: &BroadcastReport, _ctx: &BroadcastContext<'_>) {
            self.broadcasts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_rate_limited(&self, _ctx: &BroadcastContext<'_>) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_empty_scope_reports_zero() {
        let f = fixture();
        let router = router(&f, BroadcastConfig::default());
        let report = router
            .broadcast(
                BroadcastScope::Branch {
                    tenant_id: 1,
                    branch_id: 404,
                },
                Arc::from("{}"),
            )
            .await
            .unwrap();
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_branch_event_reaches_branch_only() {
        let f = fixture();
        let router = router(&f, BroadcastConfig::default());
        let (kitchen, mut kitchen_out) = staff_handle(1, 1, Role::Kitchen, &[10], &[]);
        let (other, mut other_out) = staff_handle(2, 1, Role::Kitchen, &[11], &[]);
        f.registry.register(kitchen).await.unwrap();
        f.registry.register(other).await.unwrap();

        let report = router
            .route_event(event(json!({
                "type": "ROUND_SUBMITTED", "tenant_id": 1, "branch_id": 10
            })))
            .await
            .unwrap();

        assert_eq!(report, BroadcastReport { sent: 1, failed: 0 });
        let frame = kitchen_out.frames.recv().await.unwrap();
        assert!(frame.contains("ROUND_SUBMITTED"));
        assert!(other_out.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sector_event_and_session_fanout() {
        let f = fixture();
        let router = router(&f, BroadcastConfig::default());
        let (waiter3, mut out3) = staff_handle(1, 1, Role::Waiter, &[10], &[3]);
        let (waiter4, mut out4) = staff_handle(2, 1, Role::Waiter, &[10], &[4]);
        let (diner, mut diner_out) = diner_handle(1, 10, 77);
        f.registry.register(waiter3).await.unwrap();
        f.registry.register(waiter4).await.unwrap();
        f.registry.register(diner).await.unwrap();

        let report = router
            .route_event(event(json!({
                "type": "SERVICE_CALL_CREATED", "tenant_id": 1, "branch_id": 10,
                "sector_id": 3, "session_id": 77
            })))
            .await
            .unwrap();

        assert_eq!(report.sent, 2);
        assert!(out3.frames.try_recv().is_ok());
        assert!(out4.frames.try_recv().is_err());
        assert!(diner_out.frames.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_sector_event_reaches_unassigned_staff() {
        let f = fixture();
        let router = router(&f, BroadcastConfig::default());
        let (admin, mut admin_out) = staff_handle(1, 1, Role::Admin, &[5], &[]);
        let (waiter, mut waiter_out) = staff_handle(2, 1, Role::Waiter, &[5], &[2]);
        f.registry.register(admin).await.unwrap();
        f.registry.register(waiter).await.unwrap();

        let report = router
            .route_event(event(json!({
                "type": "SERVICE_CALL_CREATED", "tenant_id": 1, "branch_id": 5, "sector_id": 2
            })))
            .await
            .unwrap();

        assert_eq!(report, BroadcastReport { sent: 2, failed: 0 });
        assert!(waiter_out.frames.try_recv().is_ok());
        assert!(admin_out.frames.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_strict_sector_routing_skips_unassigned_staff() {
        let f = fixture();
        let router = router(
            &f,
            BroadcastConfig {
                sector_fallback_to_branch: false,
                ..BroadcastConfig::default()
            },
        );
        let (admin, mut admin_out) = staff_handle(1, 1, Role::Admin, &[5], &[]);
        let (waiter, mut waiter_out) = staff_handle(2, 1, Role::Waiter, &[5], &[2]);
        f.registry.register(admin).await.unwrap();
        f.registry.register(waiter).await.unwrap();

        let report = router
            .route_event(event(json!({
                "type": "SERVICE_CALL_CREATED", "tenant_id": 1, "branch_id": 5, "sector_id": 2
            })))
            .await
            .unwrap();

        assert_eq!(report.sent, 1);
        assert!(waiter_out.frames.try_recv().is_ok());
        assert!(admin_out.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_other_tenant_never_receives() {
        let f = fixture();
        let router = router(&f, BroadcastConfig::default());
        let (foreign, mut foreign_out) = staff_handle(1, 2, Role::Admin, &[10], &[]);
        f.registry.register(foreign).await.unwrap();

        let report = router
            .route_event(event(json!({"type": "X", "tenant_id": 1, "branch_id": 10})))
            .await
            .unwrap();
        assert_eq!(report.targeted(), 0);
        assert!(foreign_out.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_send_is_counted_and_flagged() {
        let f = fixture();
        let router = router(&f, BroadcastConfig::default());
        let (live, _live_out) = staff_handle(1, 1, Role::Kitchen, &[10], &[]);
        let (dead, dead_out) = staff_handle(2, 1, Role::Kitchen, &[10], &[]);
        f.heartbeat.record(dead.id);
        f.registry.register(live).await.unwrap();
        f.registry.register(Arc::clone(&dead)).await.unwrap();
        drop(dead_out);

        let report = router
            .broadcast(
                BroadcastScope::Branch {
                    tenant_id: 1,
                    branch_id: 10,
                },
                Arc::from("{}"),
            )
            .await
            .unwrap();
        assert_eq!(report, BroadcastReport { sent: 1, failed: 1 });

        let evicted = f
            .heartbeat
            .cleanup_stale(Duration::from_secs(90))
            .await
            .unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, dead.id);
    }

    #[tokio::test]
    async fn test_large_fanout_spans_batches() {
        let f = fixture();
        let router = router(&f, BroadcastConfig::default());
        let mut outs = Vec::new();
        for user in 0..120 {
            let (h, out) = staff_handle(user, 1, Role::Kitchen, &[10], &[]);
            f.registry.register(h).await.unwrap();
            outs.push(out);
        }
        let report = router
            .broadcast(
                BroadcastScope::Branch {
                    tenant_id: 1,
                    branch_id: 10,
                },
                Arc::from("{}"),
            )
            .await
            .unwrap();
        assert_eq!(report.sent, 120);
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_rate_limit_notifies_observers() {
        let f = fixture();
        let observer = Arc::new(Counting::default());
        let router = router(
            &f,
            BroadcastConfig {
                max_broadcasts_per_second: 2,
                ..BroadcastConfig::default()
            },
        )
        .with_observer(observer.clone());
        let scope = BroadcastScope::Branch {
            tenant_id: 1,
            branch_id: 10,
        };

        router.broadcast(scope, Arc::from("a")).await.unwrap();
        router.broadcast(scope, Arc::from("b")).await.unwrap();
        let err = router.broadcast(scope, Arc::from("c")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert_eq!(observer.broadcasts.load(Ordering::SeqCst), 2);
        assert_eq!(observer.rejected.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(router.broadcast(scope, Arc::from("d")).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_refuses_and_drain_returns() {
        let f = fixture();
        let router = router(&f, BroadcastConfig::default());
        router.close();
        let err = router
            .broadcast(
                BroadcastScope::User {
                    tenant_id: 1,
                    user_id: 1,
                },
                Arc::from("{}"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
        assert!(router.drain(Duration::from_millis(10)).await);
    }
}
