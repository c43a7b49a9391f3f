//! End-to-end WebSocket tests against a running gateway.

mod helpers;

use futures::SinkExt;
use tokio_tungstenite::tungstenite::Message;

use tableside_auth::TokenType;
use tableside_core::types::Role;
use tableside_realtime::bridge::EventBus;

use helpers::{TestApp, close_code, next_json};

#[tokio::test]
async fn test_kitchen_connects_and_pings() {
    let app = TestApp::spawn().await;
    let token = app.staff_token(5, Role::Kitchen, &[10]);

    let mut socket = app.connect(&format!("/ws/kitchen?token={token}")).await;
    let connected = next_json(&mut socket).await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["role"], "KITCHEN");
    assert_eq!(connected["heartbeat_interval"], 30);

    socket.send(Message::text("ping")).await.unwrap();
    assert_eq!(next_json(&mut socket).await["type"], "pong");

    socket.close(None).await.unwrap();
    app.shutdown().await;
}

#[tokio::test]
async fn test_invalid_token_closes_with_4001() {
    let app = TestApp::spawn().await;

    let mut socket = app.connect("/ws/kitchen?token=not-a-jwt").await;
    assert_eq!(close_code(&mut socket).await, 4001);

    let mut socket = app.connect("/ws/kitchen").await;
    assert_eq!(close_code(&mut socket).await, 4001);

    let refresh = app.staff_token_of_type(5, Role::Kitchen, &[10], TokenType::Refresh);
    let mut socket = app.connect(&format!("/ws/kitchen?token={refresh}")).await;
    assert_eq!(close_code(&mut socket).await, 4001);

    assert!(app.engine.metrics().snapshot().rejected_auth >= 3);
    app.shutdown().await;
}

#[tokio::test]
async fn test_role_gate_closes_with_4003() {
    let app = TestApp::spawn().await;
    let token = app.staff_token(5, Role::Kitchen, &[10]);

    let mut socket = app.connect(&format!("/ws/admin?token={token}")).await;
    assert_eq!(close_code(&mut socket).await, 4003);
    app.shutdown().await;
}

#[tokio::test]
async fn test_oversized_frames_close_with_1008() {
    let app = TestApp::spawn().await;
    let token = app.staff_token(5, Role::Kitchen, &[10]);

    // Over the configured limit but under the transport cap.
    let mut socket = app.connect(&format!("/ws/kitchen?token={token}")).await;
    next_json(&mut socket).await;
    let _ = socket.send(Message::text("x".repeat(100 * 1024))).await;
    assert_eq!(close_code(&mut socket).await, 1008);

    // Over the transport cap: the read itself fails.
    let mut socket = app.connect(&format!("/ws/kitchen?token={token}")).await;
    next_json(&mut socket).await;
    let _ = socket.send(Message::text("x".repeat(300 * 1024))).await;
    assert_eq!(close_code(&mut socket).await, 1008);

    assert_eq!(app.engine.metrics().snapshot().closed_too_large, 2);
    app.shutdown().await;
}

#[tokio::test]
async fn test_disallowed_origin_closes_with_4003() {
    let app = TestApp::spawn_with(|config| {
        config.server.allowed_origins = vec!["https://pos.example.com".to_string()];
    })
    .await;
    let token = app.staff_token(5, Role::Kitchen, &[10]);
    let path = format!("/ws/kitchen?token={token}");

    let mut rejected = app.connect_with_origin(&path, "https://evil.example.com").await;
    assert_eq!(close_code(&mut rejected).await, 4003);

    let mut accepted = app.connect_with_origin(&path, "https://pos.example.com").await;
    assert_eq!(next_json(&mut accepted).await["type"], "connected");
    app.shutdown().await;
}

#[tokio::test]
async fn test_bus_events_reach_staff_and_diners() {
    let app = TestApp::spawn().await;
    let staff = app.staff_token(5, Role::Kitchen, &[10]);
    let diner = app.table_token(10, 42);

    let mut kitchen = app.connect(&format!("/ws/kitchen?token={staff}")).await;
    next_json(&mut kitchen).await;
    let mut table = app.connect(&format!("/ws/diner?table_token={diner}")).await;
    assert_eq!(next_json(&mut table).await["role"], "DINER");

    app.bus
        .publish(
            "events:kitchen",
            r#"{"type":"TABLE_CLEARED","tenant_id":1,"branch_id":10}"#,
        )
        .await
        .unwrap();
    app.bus
        .publish(
            "events:diner",
            r#"{"type":"ROUND_READY","tenant_id":1,"branch_id":10,"session_id":42,"entity":{"round_id":9}}"#,
        )
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..2 {
        let event = next_json(&mut kitchen).await;
        if event["type"] == "ROUND_READY" {
            assert_eq!(event["entity"]["round_id"], 9);
        }
        seen.push(event["type"].as_str().unwrap().to_string());
    }
    seen.sort();
    assert_eq!(seen, ["ROUND_READY", "TABLE_CLEARED"]);

    // Branch-wide staff events never reach diners.
    assert_eq!(next_json(&mut table).await["type"], "ROUND_READY");
    app.shutdown().await;
}

#[tokio::test]
async fn test_waiter_only_sees_assigned_sector() {
    let app = TestApp::spawn().await;
    app.sectors.assign(1, 7, [3]);
    let token = app.staff_token(7, Role::Waiter, &[10]);

    let mut waiter = app.connect(&format!("/ws/waiter?token={token}")).await;
    next_json(&mut waiter).await;

    for sector in [4, 3] {
        app.bus
            .publish(
                "events:waiter",
                &format!(
                    r#"{{"type":"SERVICE_CALL","tenant_id":1,"branch_id":10,"sector_id":{sector}}}"#
                ),
            )
            .await
            .unwrap();
    }

    let event = next_json(&mut waiter).await;
    assert_eq!(event["sector_id"], 3);
    app.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_sockets_with_1001() {
    let app = TestApp::spawn().await;
    let token = app.staff_token(5, Role::Kitchen, &[10]);
    let mut socket = app.connect(&format!("/ws/kitchen?token={token}")).await;
    next_json(&mut socket).await;

    let engine = app.engine.clone();
    let shutdown = tokio::spawn(app.shutdown());

    assert_eq!(close_code(&mut socket).await, 1001);
    shutdown.await.unwrap();
    assert!(!engine.is_accepting());
}
