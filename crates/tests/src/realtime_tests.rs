//! WebSocket registration, tenant broadcast, heartbeat eviction and drain.

use crate::mock_infrastructure::{gateway_config, TestGateway, TokenFactory};
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(gateway: &TestGateway, tenant: &str) -> Socket {
    let url = gateway.ws_url(&format!("/ws?tenant_id={tenant}"));
    let (socket, _) = connect_async(url).await.expect("Failed to connect");
    socket
}

/// Next text frame as JSON, skipping control frames.
async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let message = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..40 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

#[tokio::test]
async fn test_connected_frame_carries_identity() {
    let gateway = TestGateway::spawn(gateway_config()).await.unwrap();
    let mut socket = connect(&gateway, "acme").await;

    let frame = next_json(&mut socket).await;

    assert_eq!(frame["type"], "connected");
    assert_eq!(frame["data"]["tenant_id"], "acme");
    assert!(frame["data"]["connection_id"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(gateway.runtime().registry().tenant_connection_count("acme"), 1);
}

#[tokio::test]
async fn test_broadcast_reaches_only_the_callers_tenant() {
    let gateway = TestGateway::spawn(gateway_config()).await.unwrap();
    let mut acme_a = connect(&gateway, "acme").await;
    let mut acme_b = connect(&gateway, "acme").await;
    let mut globex = connect(&gateway, "globex").await;
    for socket in [&mut acme_a, &mut acme_b, &mut globex] {
        assert_eq!(next_json(socket).await["type"], "connected");
    }

    let tokens = TokenFactory::default();
    let publisher = tokens.mint("svc", "acme", &["realtime:publish"]).unwrap();
    let client = reqwest::Client::new();

    let response = client
        .post(gateway.url("/realtime/broadcast"))
        .bearer_auth(&publisher)
        .json(&json!({"type": "thread.updated", "data": {"id": "t1"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["delivered"], 2);

    for socket in [&mut acme_a, &mut acme_b] {
        let frame = next_json(socket).await;
        assert_eq!(frame["type"], "thread.updated");
        assert_eq!(frame["data"]["id"], "t1");
    }
    assert!(timeout(Duration::from_millis(200), globex.next()).await.is_err());

    let admin = tokens.mint("ops", "acme", &["realtime:admin"]).unwrap();
    let response = client
        .post(gateway.url("/realtime/broadcast/all"))
        .bearer_auth(&admin)
        .json(&json!({"type": "maintenance"}))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["delivered"], 3);
    assert_eq!(next_json(&mut globex).await["type"], "maintenance");
}

#[tokio::test]
async fn test_publish_scope_cannot_broadcast_globally() {
    let gateway = TestGateway::spawn(gateway_config()).await.unwrap();
    let token = TokenFactory::default().mint("svc", "acme", &["realtime:publish"]).unwrap();

    let response = reqwest::Client::new()
        .post(gateway.url("/realtime/broadcast/all"))
        .bearer_auth(token)
        .json(&json!({"type": "maintenance"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_heartbeat_evicts_silent_peers() {
    let mut config = gateway_config();
    config.realtime.heartbeat_interval_ms = 100;
    let gateway = TestGateway::spawn(config).await.unwrap();

    let mut responsive = connect(&gateway, "acme").await;
    assert_eq!(next_json(&mut responsive).await["type"], "connected");
    // Reading lets the client answer pings.
    let reader = tokio::spawn(async move { while let Some(Ok(_)) = responsive.next().await {} });

    let mut silent = connect(&gateway, "globex").await;
    assert_eq!(next_json(&mut silent).await["type"], "connected");

    let registry = gateway.runtime().registry().clone();
    assert!(wait_for(|| registry.tenant_connection_count("globex") == 0).await);
    assert_eq!(registry.tenant_connection_count("acme"), 1);

    reader.abort();
    drop(silent);
}

#[tokio::test]
async fn test_shutdown_closes_open_sockets() {
    let gateway = TestGateway::spawn(gateway_config()).await.unwrap();
    let mut socket = connect(&gateway, "acme").await;
    assert_eq!(next_json(&mut socket).await["type"], "connected");
    let registry = gateway.runtime().registry().clone();

    gateway.shutdown().await;

    assert_eq!(registry.connection_count(), 0);
    let next = timeout(Duration::from_secs(2), socket.next()).await.unwrap();
    assert!(matches!(next, None | Some(Ok(Message::Close(_)) | Err(_))));
}

#[tokio::test]
async fn test_upgrade_after_drain_is_closed_at_once() {
    let gateway = TestGateway::spawn(gateway_config()).await.unwrap();
    gateway.runtime().shutdown().await;

    let mut socket = connect(&gateway, "acme").await;

    let next = timeout(Duration::from_secs(2), socket.next()).await.unwrap();
    assert!(matches!(next, None | Some(Ok(Message::Close(_)) | Err(_))));
    assert_eq!(gateway.runtime().registry().connection_count(), 0);
}
