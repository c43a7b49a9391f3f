//! End-to-end session lifecycle tests against an in-process engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tableside_auth::NullStrategy;
use tableside_core::config::{BusConfig, RealtimeConfig};
use tableside_core::error::AppError;
use tableside_core::result::AppResult;
use tableside_core::traits::SectorLookup;
use tableside_core::types::{Role, SectorId, TenantId, UserId};
use tableside_realtime::bridge::MemoryPubSub;
use tableside_realtime::broadcast::scope::BroadcastScope;
use tableside_realtime::connection::handle::Outbound;
use tableside_realtime::message::close_code::CloseCode;
use tableside_realtime::sector::StaticSectorLookup;
use tableside_realtime::session::{ClientFrame, EndpointKind, FrameSource, SessionOutcome};
use tableside_realtime::{EngineDeps, RealtimeEngine};

/// Frames pushed by the test, as a socket would deliver them.
struct ScriptedSource {
    frames: mpsc::UnboundedReceiver<ClientFrame>,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Option<AppResult<ClientFrame>> {
        self.frames.recv().await.map(Ok)
    }
}

struct Client {
    input: mpsc::UnboundedSender<ClientFrame>,
    outbound: Outbound,
    task: JoinHandle<SessionOutcome>,
}

impl Client {
    fn send_text(&self, text: &str) {
        self.input.send(ClientFrame::Text(text.to_string())).unwrap();
    }

    async fn next_json(&mut self) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.outbound.frames.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("outbound closed");
        serde_json::from_str(&frame).unwrap()
    }

    async fn finish(self) -> SessionOutcome {
        drop(self.input);
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("session did not finish")
            .unwrap()
    }
}

struct Harness {
    engine: Arc<RealtimeEngine>,
    sectors: Arc<StaticSectorLookup>,
    staff: Arc<NullStrategy>,
}

impl Harness {
    fn new(staff: NullStrategy, config: RealtimeConfig) -> Self {
        let sectors = Arc::new(StaticSectorLookup::new());
        Self::build(Arc::new(staff), sectors.clone(), sectors, config)
    }

    fn build(
        staff: Arc<NullStrategy>,
        sector_lookup: Arc<dyn SectorLookup>,
        sectors: Arc<StaticSectorLookup>,
        config: RealtimeConfig,
    ) -> Self {
        let engine = Arc::new(RealtimeEngine::new(
            config,
            BusConfig::default(),
            EngineDeps {
                bus: Arc::new(MemoryPubSub::default()),
                sector_lookup,
                staff_auth: staff.clone(),
                diner_auth: Arc::new(NullStrategy::diner(1, 10, 4, 77)),
            },
        ));
        Self {
            engine,
            sectors,
            staff,
        }
    }

    /// Waiter harness whose sector assignments come from `lookup`.
    fn waiter_with_lookup(lookup: Arc<dyn SectorLookup>) -> Self {
        Self::build(
            Arc::new(NullStrategy::staff_user(7, Role::Waiter, 1, vec![10])),
            lookup,
            Arc::new(StaticSectorLookup::new()),
            RealtimeConfig::default(),
        )
    }

    fn waiter(user_id: i64) -> Self {
        Self::new(
            NullStrategy::staff_user(user_id, Role::Waiter, 1, vec![10]),
            RealtimeConfig::default(),
        )
    }

    fn connect(&self, kind: EndpointKind) -> Client {
        let (session, outbound) = self.engine.open_session(kind);
        let (input, frames) = mpsc::unbounded_channel();
        let task = tokio::spawn(session.run(ScriptedSource { frames }, Some("token".to_string())));
        Client {
            input,
            outbound,
            task,
        }
    }
}

#[tokio::test]
async fn test_waiter_connects_and_answers_ping() {
    let harness = Harness::waiter(7);
    harness.sectors.assign(1, 7, [3]);

    let mut client = harness.connect(EndpointKind::Waiter);
    let connected = client.next_json().await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["role"], "WAITER");
    assert_eq!(harness.engine.registry().connection_count(), 1);

    client.send_text("ping");
    assert_eq!(client.next_json().await["type"], "pong");
    client.send_text(r#"{"type":"ping"}"#);
    assert_eq!(client.next_json().await["type"], "pong");

    client.input.send(ClientFrame::Close).unwrap();
    let outcome = client.finish().await;
    assert_eq!(outcome.close_code, CloseCode::Normal);
    assert!(outcome.connection_id.is_some());
    assert_eq!(harness.engine.registry().connection_count(), 0);

    let snapshot = harness.engine.metrics().snapshot();
    assert_eq!(snapshot.connections_total, 1);
    assert_eq!(snapshot.connections_active, 0);
}

#[tokio::test]
async fn test_revoked_credential_is_refused() {
    let staff = NullStrategy::staff(Role::Kitchen, 1, vec![10]);
    staff.revoke_all();
    let harness = Harness::new(staff, RealtimeConfig::default());

    let outcome = harness.connect(EndpointKind::Kitchen).finish().await;
    assert_eq!(outcome.close_code, CloseCode::AuthFailed);
    assert!(outcome.connection_id.is_none());
    assert_eq!(harness.engine.metrics().snapshot().rejected_auth, 1);
}

#[tokio::test(start_paused = true)]
async fn test_revalidation_closes_revoked_session() {
    let harness = Harness::new(
        NullStrategy::staff(Role::Kitchen, 1, vec![10]),
        RealtimeConfig::default(),
    );
    let mut client = harness.connect(EndpointKind::Kitchen);
    assert_eq!(client.next_json().await["type"], "connected");

    harness.staff.revoke_all();
    let period = Duration::from_secs(RealtimeConfig::default().revalidate_interval_seconds);
    let outcome = tokio::time::timeout(period * 2, client.task)
        .await
        .expect("revalidation never ran")
        .unwrap();

    assert_eq!(outcome.close_code, CloseCode::AuthFailed);
    assert!(outcome.connection_id.is_some());
    assert_eq!(harness.engine.registry().connection_count(), 0);
    assert_eq!(harness.engine.metrics().snapshot().closed_revoked, 1);
    drop(client.input);
}

#[tokio::test(start_paused = true)]
async fn test_valid_credential_survives_revalidation() {
    let harness = Harness::new(
        NullStrategy::staff(Role::Kitchen, 1, vec![10]),
        RealtimeConfig::default(),
    );
    let mut client = harness.connect(EndpointKind::Kitchen);
    client.next_json().await;

    let period = Duration::from_secs(RealtimeConfig::default().revalidate_interval_seconds);
    tokio::time::sleep(period * 3).await;
    assert!(!client.task.is_finished());
    assert_eq!(harness.engine.registry().connection_count(), 1);

    client.input.send(ClientFrame::Close).unwrap();
    assert_eq!(client.finish().await.close_code, CloseCode::Normal);
}

/// Sector store that never answers.
#[derive(Debug)]
struct HangingLookup;

#[async_trait]
impl SectorLookup for HangingLookup {
    async fn get_sectors(&self, _user_id: UserId, _tenant_id: TenantId) -> AppResult<Vec<SectorId>> {
        std::future::pending().await
    }
}

/// Sector store that is down.
#[derive(Debug)]
struct BrokenLookup;

#[async_trait]
impl SectorLookup for BrokenLookup {
    async fn get_sectors(&self, _user_id: UserId, _tenant_id: TenantId) -> AppResult<Vec<SectorId>> {
        Err(AppError::external("sector store unreachable"))
    }
}

#[tokio::test(start_paused = true)]
async fn test_sector_lookup_timeout_refuses_registration() {
    let harness = Harness::waiter_with_lookup(Arc::new(HangingLookup));

    let outcome = harness.connect(EndpointKind::Waiter).finish().await;
    assert_eq!(outcome.close_code, CloseCode::InternalError);
    assert_eq!(outcome.close_code.code(), 1011);
    assert!(outcome.connection_id.is_none());
    assert_eq!(harness.engine.registry().connection_count(), 0);
    assert_eq!(harness.engine.registry().stats().sectors, 0);
    assert_eq!(harness.engine.metrics().snapshot().rejected_lookup, 1);
}

#[tokio::test]
async fn test_sector_lookup_error_refuses_registration() {
    let harness = Harness::waiter_with_lookup(Arc::new(BrokenLookup));

    let outcome = harness.connect(EndpointKind::Waiter).finish().await;
    assert_eq!(outcome.close_code, CloseCode::InternalError);
    assert!(outcome.connection_id.is_none());
    assert_eq!(harness.engine.registry().connection_count(), 0);
    assert_eq!(harness.engine.metrics().snapshot().connections_total, 0);
}

#[tokio::test]
async fn test_role_not_allowed_on_endpoint() {
    let harness = Harness::new(
        NullStrategy::staff(Role::Kitchen, 1, vec![10]),
        RealtimeConfig::default(),
    );

    let outcome = harness.connect(EndpointKind::Admin).finish().await;
    assert_eq!(outcome.close_code, CloseCode::Forbidden);
    assert_eq!(harness.engine.registry().connection_count(), 0);
}

#[tokio::test]
async fn test_oversized_frame_closes_with_policy_violation() {
    let config = RealtimeConfig {
        max_message_bytes: 64,
        ..RealtimeConfig::default()
    };
    let harness = Harness::new(NullStrategy::staff(Role::Kitchen, 1, vec![10]), config);

    let mut client = harness.connect(EndpointKind::Kitchen);
    client.next_json().await;
    client.send_text(&"x".repeat(65));

    let outcome = client.finish().await;
    assert_eq!(outcome.close_code, CloseCode::PolicyViolation);
    assert_eq!(harness.engine.metrics().snapshot().closed_too_large, 1);
}

#[tokio::test]
async fn test_transport_size_cap_closes_with_policy_violation() {
    let harness = Harness::new(
        NullStrategy::staff(Role::Kitchen, 1, vec![10]),
        RealtimeConfig::default(),
    );

    let mut client = harness.connect(EndpointKind::Kitchen);
    client.next_json().await;
    client.input.send(ClientFrame::TooLarge).unwrap();

    let outcome = client.finish().await;
    assert_eq!(outcome.close_code, CloseCode::PolicyViolation);
    assert_eq!(outcome.reason, "message too large");
    assert_eq!(harness.engine.registry().connection_count(), 0);
    assert_eq!(harness.engine.metrics().snapshot().closed_too_large, 1);
}

#[tokio::test]
async fn test_flooding_client_is_rate_limited() {
    let harness = Harness::new(
        NullStrategy::staff(Role::Kitchen, 1, vec![10]),
        RealtimeConfig::default(),
    );

    let mut client = harness.connect(EndpointKind::Kitchen);
    client.next_json().await;
    for _ in 0..25 {
        client.send_text(r#"{"type":"pong"}"#);
    }

    let outcome = client.finish().await;
    assert_eq!(outcome.close_code, CloseCode::RateLimited);
    assert_eq!(outcome.close_code.code(), 4029);
}

#[tokio::test]
async fn test_unknown_message_gets_error_reply() {
    let harness = Harness::new(
        NullStrategy::staff(Role::Kitchen, 1, vec![10]),
        RealtimeConfig::default(),
    );

    let mut client = harness.connect(EndpointKind::Kitchen);
    client.next_json().await;
    client.send_text(r#"{"type":"subscribe"}"#);

    let reply = client.next_json().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "INVALID_MESSAGE");
    assert_eq!(harness.engine.registry().connection_count(), 1);
}

#[tokio::test]
async fn test_sector_refresh_changes_delivery() {
    let harness = Harness::waiter(7);
    harness.sectors.assign(1, 7, [3]);

    let mut client = harness.connect(EndpointKind::Waiter);
    client.next_json().await;

    let router = harness.engine.router();
    let sector = |sector_id| BroadcastScope::Sector {
        tenant_id: 1,
        branch_id: 10,
        sector_id,
    };
    let report = router.broadcast(sector(3), Arc::from(r#"{"type":"A"}"#)).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(client.next_json().await["type"], "A");

    harness.sectors.assign(1, 7, [5]);
    client.send_text(r#"{"type":"refresh_sectors"}"#);
    let updated = client.next_json().await;
    assert_eq!(updated["type"], "sectors_updated");
    assert_eq!(updated["sector_ids"], serde_json::json!([5]));

    let report = router.broadcast(sector(5), Arc::from(r#"{"type":"B"}"#)).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(client.next_json().await["type"], "B");
}

#[tokio::test]
async fn test_diner_receives_session_broadcasts_only() {
    let harness = Harness::new(
        NullStrategy::staff(Role::Kitchen, 1, vec![10]),
        RealtimeConfig::default(),
    );

    let mut diner = harness.connect(EndpointKind::Diner);
    assert_eq!(diner.next_json().await["role"], "DINER");

    let router = harness.engine.router();
    let other = router
        .broadcast(
            BroadcastScope::Session {
                tenant_id: 1,
                session_id: 78,
            },
            Arc::from(r#"{"type":"OTHER"}"#),
        )
        .await
        .unwrap();
    assert_eq!(other.targeted(), 0);

    let own = router
        .broadcast(
            BroadcastScope::Session {
                tenant_id: 1,
                session_id: 77,
            },
            Arc::from(r#"{"type":"MINE"}"#),
        )
        .await
        .unwrap();
    assert_eq!(own.sent, 1);
    assert_eq!(diner.next_json().await["type"], "MINE");
}

#[tokio::test]
async fn test_user_connection_limit() {
    let config = RealtimeConfig {
        max_connections_per_user: 1,
        ..RealtimeConfig::default()
    };
    let harness = Harness::new(NullStrategy::staff_user(3, Role::Kitchen, 1, vec![10]), config);

    let mut first = harness.connect(EndpointKind::Kitchen);
    first.next_json().await;

    let second = harness.connect(EndpointKind::Kitchen).finish().await;
    assert_eq!(second.close_code, CloseCode::PolicyViolation);
    assert_eq!(harness.engine.registry().connection_count(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_live_sessions() {
    let harness = Harness::new(
        NullStrategy::staff(Role::Kitchen, 1, vec![10]),
        RealtimeConfig::default(),
    );
    let mut client = harness.connect(EndpointKind::Kitchen);
    client.next_json().await;

    harness.engine.shutdown().await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), client.task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.close_code, CloseCode::GoingAway);
    assert_eq!(harness.engine.metrics().snapshot().connections_active, 0);
}
