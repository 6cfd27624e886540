//! Downstream forwarding through the full router.

use crate::mock_infrastructure::{
    gateway_config, unresponsive_downstream, DownstreamMock, TestGateway, TokenFactory,
};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_forwards_identity_headers_and_body() {
    let mut messages = DownstreamMock::new().await;
    messages.mock_json_with_header(
        "POST",
        "/v1/threads",
        "x-correlation-id",
        "trace-fwd",
        &json!({"id": "t1"}),
    );

    let mut config = gateway_config();
    config.downstream.services.insert("messages".to_string(), messages.url());
    let gateway = TestGateway::spawn(config).await.unwrap();
    let token = TokenFactory::default().mint("u1", "acme", &["messages:write"]).unwrap();

    let response = reqwest::Client::new()
        .post(gateway.url("/api/messages/v1/threads"))
        .header("x-correlation-id", "trace-fwd")
        .bearer_auth(token)
        .json(&json!({"subject": "hello"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-correlation-id"], "trace-fwd");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"id": "t1"}));
    messages.assert_all();
}

#[tokio::test]
async fn test_downstream_error_status_passes_through() {
    let mut messages = DownstreamMock::new().await;
    messages.mock_json("GET", "/v1/threads/missing", 404, &json!({"error": "no such thread"}));

    let mut config = gateway_config();
    config.downstream.services.insert("messages".to_string(), messages.url());
    let gateway = TestGateway::spawn(config).await.unwrap();
    let token = TokenFactory::default().mint("u1", "acme", &["messages:read"]).unwrap();

    let response = reqwest::Client::new()
        .get(gateway.url("/api/messages/v1/threads/missing"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "no such thread");
}

#[tokio::test]
async fn test_encoded_backslash_traversal_is_rejected() {
    let mut messages = DownstreamMock::new().await;
    messages.mock_json("GET", "/admin", 200, &json!({"secret": true}));

    let mut config = gateway_config();
    config
        .downstream
        .services
        .insert("messages".to_string(), format!("{}/tenant-api/v1", messages.url()));
    let gateway = TestGateway::spawn(config).await.unwrap();
    let token = TokenFactory::default().mint("u1", "acme", &["messages:read"]).unwrap();

    let response = reqwest::Client::new()
        .get(gateway.url("/api/messages/x%5C..%5C..%5C..%5Cadmin"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_unknown_service_is_not_found() {
    let gateway = TestGateway::spawn(gateway_config()).await.unwrap();
    let token = TokenFactory::default().mint("u1", "acme", &["*"]).unwrap();

    let response = reqwest::Client::new()
        .get(gateway.url("/api/billing/v1/invoices"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "unknown_service");
}

#[tokio::test]
async fn test_unresponsive_downstream_times_out() {
    let (url, _listener) = unresponsive_downstream().await.unwrap();

    let mut config = gateway_config();
    config.downstream.timeout_ms = 300;
    config.downstream.services.insert("funnels".to_string(), url);
    let gateway = TestGateway::spawn(config).await.unwrap();
    let token = TokenFactory::default().mint("u1", "acme", &["funnels:read"]).unwrap();

    let started = Instant::now();
    let response = reqwest::Client::new()
        .get(gateway.url("/api/funnels/v1/pages"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "timeout");
    assert_eq!(body["tenant_id"], "acme");
}

#[tokio::test]
async fn test_unreachable_downstream_is_bad_gateway() {
    let mut config = gateway_config();
    config.downstream.services.insert("analytics".to_string(), "http://127.0.0.1:9".to_string());
    let gateway = TestGateway::spawn(config).await.unwrap();
    let token = TokenFactory::default().mint("u1", "acme", &["analytics:read"]).unwrap();

    let response = reqwest::Client::new()
        .get(gateway.url("/api/analytics/v1/reports"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}
