//! Bearer token verification and scope checks on proxied and realtime routes.

use crate::mock_infrastructure::{gateway_config, DownstreamMock, TestGateway, TokenFactory};
use reqwest::StatusCode;
use serde_json::{json, Value};

async fn gateway() -> (TestGateway, DownstreamMock) {
    let mut contacts = DownstreamMock::new().await;
    contacts.mock_json("GET", "/v1/people", 200, &json!({"people": []}));
    contacts.mock_json("POST", "/v1/people", 201, &json!({"id": "p1"}));

    let mut config = gateway_config();
    config.downstream.services.insert("contacts".to_string(), contacts.url());
    (TestGateway::spawn(config).await.expect("gateway should start"), contacts)
}

async fn error_code(response: reqwest::Response) -> String {
    let body: Value = response.json().await.unwrap();
    body["code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_missing_and_malformed_credentials() {
    let (gateway, _contacts) = gateway().await;
    let client = reqwest::Client::new();
    let url = gateway.url("/api/contacts/v1/people");

    let missing = client.get(&url).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(missing).await, "missing_credentials");

    let basic = client.get(&url).header("authorization", "Basic dXNlcjpwYXNz").send().await.unwrap();
    assert_eq!(basic.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(basic).await, "missing_credentials");
}

#[tokio::test]
async fn test_rejected_tokens_are_invalid() {
    let (gateway, _contacts) = gateway().await;
    let client = reqwest::Client::new();
    let url = gateway.url("/api/contacts/v1/people");

    let forged = TokenFactory::new("someone-elses-secret", crate::mock_infrastructure::TEST_ISSUER)
        .mint("u1", "acme", &["contacts:read"])
        .unwrap();
    let response = client.get(&url).bearer_auth(forged).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "invalid_token");

    let expired = TokenFactory::default().mint_expired("u1", "acme", &["contacts:read"]).unwrap();
    let response = client.get(&url).bearer_auth(expired).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "invalid_token");

    let wrong_issuer = TokenFactory::new(crate::mock_infrastructure::TEST_SECRET, "https://elsewhere")
        .mint("u1", "acme", &["contacts:read"])
        .unwrap();
    let response = client.get(&url).bearer_auth(wrong_issuer).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let garbage = client.get(&url).bearer_auth("not.a.jwt").send().await.unwrap();
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_scope_hierarchy_grants_implied_scopes() {
    let (gateway, _contacts) = gateway().await;
    let client = reqwest::Client::new();
    let url = gateway.url("/api/contacts/v1/people");
    let tokens = TokenFactory::default();

    let admin = tokens.mint("u1", "acme", &["contacts:admin"]).unwrap();
    let read = client.get(&url).bearer_auth(&admin).send().await.unwrap();
    assert_eq!(read.status(), StatusCode::OK);
    let write = client.post(&url).bearer_auth(&admin).json(&json!({"name": "Ada"})).send().await.unwrap();
    assert_eq!(write.status(), StatusCode::CREATED);

    let wildcard = tokens.mint("u2", "acme", &["*"]).unwrap();
    let response = client.post(&url).bearer_auth(&wildcard).json(&json!({})).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_insufficient_scope_reports_both_sets() {
    let (gateway, _contacts) = gateway().await;
    let token = TokenFactory::default().mint("u1", "acme", &["contacts:read", "messages:admin"]).unwrap();

    let response = reqwest::Client::new()
        .post(gateway.url("/api/contacts/v1/people"))
        .bearer_auth(token)
        .json(&json!({"name": "Ada"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "insufficient_scope");
    assert_eq!(body["required_scopes"], json!(["contacts:write"]));
    assert_eq!(body["user_scopes"], json!(["contacts:read", "messages:admin"]));
    assert_eq!(body["tenant_id"], "acme");
}

#[tokio::test]
async fn test_token_tenant_replaces_header_tenant() {
    let (gateway, _contacts) = gateway().await;
    let token = TokenFactory::default().mint("u1", "acme", &["contacts:read"]).unwrap();

    let response = reqwest::Client::new()
        .get(gateway.url("/api/contacts/v1/people"))
        .header("x-tenant-id", "spoofed")
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-tenant-id"], "acme");
}

#[tokio::test]
async fn test_auth_disabled_uses_header_tenant() {
    let mut contacts = DownstreamMock::new().await;
    contacts.mock_json_with_header("GET", "/v1/people", "x-tenant-id", "acme", &json!({"people": []}));
    let mut config = gateway_config();
    config.auth.enabled = false;
    config.downstream.services.insert("contacts".to_string(), contacts.url());
    let gateway = TestGateway::spawn(config).await.unwrap();

    let response = reqwest::Client::new()
        .get(gateway.url("/api/contacts/v1/people"))
        .header("x-tenant-id", "acme")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    contacts.assert_all();
}
