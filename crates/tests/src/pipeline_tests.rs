//! Context, rate limiting and error envelope behaviour through the full router.

use crate::mock_infrastructure::{gateway_config, DownstreamMock, TestGateway, TokenFactory};
use gateway_core::config::WindowConfig;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

async fn messages_gateway(tenant: WindowConfig) -> (TestGateway, DownstreamMock) {
    let mut messages = DownstreamMock::new().await;
    messages.mock_json("GET", "/v1/threads", 200, &json!({"threads": []}));

    let mut config = gateway_config();
    config.rate_limit.tenant = tenant;
    config.downstream.services.insert("messages".to_string(), messages.url());

    let gateway = TestGateway::spawn(config).await.expect("gateway should start");
    (gateway, messages)
}

#[tokio::test]
async fn test_tenant_window_denies_then_recovers() {
    let (gateway, _messages) =
        messages_gateway(WindowConfig { max_requests: 3, window_ms: 2000 }).await;
    let token = TokenFactory::default().mint("u1", "acme", &["messages:read"]).unwrap();
    let client = reqwest::Client::new();
    let url = gateway.url("/api/messages/v1/threads");

    for expected_remaining in ["2", "1", "0"] {
        let response = client.get(&url).bearer_auth(&token).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["ratelimit-limit"], "3");
        assert_eq!(response.headers()["ratelimit-remaining"], expected_remaining);
    }

    let denied = client.get(&url).bearer_auth(&token).send().await.unwrap();
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(denied.headers().contains_key("retry-after"));
    let body: Value = denied.json().await.unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["code"], "rate_limited");
    assert_eq!(body["tenant_id"], "acme");
    assert_eq!(body["limit"], 3);
    assert_eq!(body["window_ms"], 2000);
    assert!(body["retry_after"].as_u64().unwrap() <= 2000);

    tokio::time::sleep(Duration::from_millis(2100)).await;

    let recovered = client.get(&url).bearer_auth(&token).send().await.unwrap();
    assert_eq!(recovered.status(), StatusCode::OK);
    assert_eq!(recovered.headers()["ratelimit-remaining"], "2");
}

#[tokio::test]
async fn test_tenants_have_independent_windows() {
    let (gateway, _messages) =
        messages_gateway(WindowConfig { max_requests: 1, window_ms: 60_000 }).await;
    let tokens = TokenFactory::default();
    let acme = tokens.mint("u1", "acme", &["messages:read"]).unwrap();
    let globex = tokens.mint("u2", "globex", &["messages:read"]).unwrap();
    let client = reqwest::Client::new();
    let url = gateway.url("/api/messages/v1/threads");

    let first = client.get(&url).bearer_auth(&acme).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = client.get(&url).bearer_auth(&acme).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = client.get(&url).bearer_auth(&globex).send().await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
    assert_eq!(other.headers()["x-tenant-id"], "globex");
}

#[tokio::test]
async fn test_correlation_id_round_trip() {
    let (gateway, _messages) =
        messages_gateway(WindowConfig { max_requests: 10, window_ms: 60_000 }).await;
    let client = reqwest::Client::new();

    let echoed = client
        .get(gateway.url("/health"))
        .header("x-correlation-id", "trace-123")
        .send()
        .await
        .unwrap();
    assert_eq!(echoed.headers()["x-correlation-id"], "trace-123");
    assert_eq!(echoed.headers()["x-tenant-id"], "default");

    let generated = client.get(gateway.url("/health")).send().await.unwrap();
    let id = generated.headers()["x-correlation-id"].to_str().unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&id).is_ok());
}

#[tokio::test]
async fn test_error_envelope_on_unknown_route() {
    let (gateway, _messages) =
        messages_gateway(WindowConfig { max_requests: 10, window_ms: 60_000 }).await;

    let response = reqwest::Client::new()
        .get(gateway.url("/does/not/exist"))
        .header("x-correlation-id", "trace-404")
        .header("x-tenant-id", "acme")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["correlation_id"], "trace-404");
    assert_eq!(body["tenant_id"], "acme");
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_services_health_reports_degraded() {
    let mut healthy = DownstreamMock::new().await;
    healthy.mock_health(200);
    let mut failing = DownstreamMock::new().await;
    failing.mock_health(503);

    let mut config = gateway_config();
    config.downstream.services.insert("contacts".to_string(), healthy.url());
    config.downstream.services.insert("messages".to_string(), failing.url());
    let gateway = TestGateway::spawn(config).await.unwrap();

    let response = reqwest::get(gateway.url("/health/services")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["services"][0]["service"], "contacts");
    assert_eq!(body["services"][0]["healthy"], true);
    assert_eq!(body["services"][1]["service"], "messages");
    assert_eq!(body["services"][1]["healthy"], false);
    assert_eq!(body["services"][1]["status"], 503);
}
