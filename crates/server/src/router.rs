//! REST handlers.

use crate::{error::GatewayError, middleware::context::context_of};
use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{SecondsFormat, Utc};
use gateway_core::{
    auth::Principal,
    context::RequestContext,
    proxy::{ProxyBody, ProxyResult, ServiceHealth},
    realtime::RealtimeMessage,
    runtime::GatewayRuntime,
};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub status: &'static str,
    pub environment: String,
    pub uptime_seconds: u64,
    pub connections: usize,
    pub timestamp: String,
}

/// Gateway liveness. No downstream calls.
pub async fn handle_health(State(runtime): State<Arc<GatewayRuntime>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        status: "ok",
        environment: runtime.config().environment.clone(),
        uptime_seconds: runtime.uptime_seconds(),
        connections: runtime.registry().connection_count(),
        timestamp: now(),
    })
}

#[derive(Debug, Serialize)]
pub struct ServicesHealthResponse {
    pub ok: bool,
    pub status: &'static str,
    pub services: Vec<ServiceHealth>,
    pub timestamp: String,
}

/// Probes every downstream's `/health` concurrently.
pub async fn handle_services_health(
    State(runtime): State<Arc<GatewayRuntime>>,
) -> Json<ServicesHealthResponse> {
    let services = runtime.proxy().check_all().await;
    let healthy = services.iter().all(|service| service.healthy);

    Json(ServicesHealthResponse {
        ok: healthy,
        status: if healthy { "ok" } else { "degraded" },
        services,
        timestamp: now(),
    })
}

/// Forwards `/api/{service}/{*path}` to the service's base URL.
pub async fn handle_proxy(
    State(runtime): State<Arc<GatewayRuntime>>,
    Extension(context): Extension<RequestContext>,
    Path(params): Path<HashMap<String, String>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let production = runtime.config().is_production();
    let service = params.get("service").map_or("", String::as_str);
    let path = params.get("path").map_or("", String::as_str);

    let spec = match runtime.proxy().request_spec(
        service,
        path,
        uri.query(),
        method,
        &headers,
        body,
        &context,
    ) {
        Ok(spec) => spec,
        Err(e) => return GatewayError::from(e).into_response_for(&context, production),
    };

    match runtime.proxy().forward(spec, &context).await {
        Ok(result) => proxy_response(result),
        Err(e) => GatewayError::from(e).into_response_for(&context, production),
    }
}

/// Marks a response relayed from a downstream so its status and body pass untouched.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DownstreamResponse;

fn proxy_response(result: ProxyResult) -> Response {
    let mut response = match result.body {
        ProxyBody::Json(value) => Json(value).into_response(),
        ProxyBody::Text(text) => text.into_response(),
        ProxyBody::Empty => Body::empty().into_response(),
    };

    *response.status_mut() = result.status;
    if let Some(content_type) = result.content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response.extensions_mut().insert(DownstreamResponse);

    response
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub ok: bool,
    pub delivered: usize,
}

fn broadcast_payload(
    runtime: &GatewayRuntime,
    payload: Result<Json<RealtimeMessage>, JsonRejection>,
) -> Result<RealtimeMessage, GatewayError> {
    payload.map(|Json(message)| message).map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            GatewayError::PayloadTooLarge { limit: runtime.config().server.max_body_bytes }
        } else {
            GatewayError::BadRequest(e.body_text())
        }
    })
}

/// Broadcasts `{type, data}` to every connection of the caller's tenant.
pub async fn handle_broadcast(
    State(runtime): State<Arc<GatewayRuntime>>,
    Extension(context): Extension<RequestContext>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<RealtimeMessage>, JsonRejection>,
) -> Response {
    let message = match broadcast_payload(&runtime, payload) {
        Ok(message) => message,
        Err(e) => return e.into_response_for(&context, runtime.config().is_production()),
    };

    let delivered = runtime.registry().broadcast_to_tenant(&principal.tenant_id, &message);
    tracing::info!(
        tenant_id = %principal.tenant_id,
        correlation_id = %context.correlation_id,
        message_type = %message.kind,
        delivered,
        "tenant broadcast"
    );

    Json(BroadcastResponse { ok: true, delivered }).into_response()
}

/// Broadcasts `{type, data}` to every connection.
pub async fn handle_broadcast_all(
    State(runtime): State<Arc<GatewayRuntime>>,
    Extension(context): Extension<RequestContext>,
    payload: Result<Json<RealtimeMessage>, JsonRejection>,
) -> Response {
    let message = match broadcast_payload(&runtime, payload) {
        Ok(message) => message,
        Err(e) => return e.into_response_for(&context, runtime.config().is_production()),
    };

    let delivered = runtime.registry().broadcast_to_all(&message);
    tracing::info!(
        correlation_id = %context.correlation_id,
        message_type = %message.kind,
        delivered,
        "global broadcast"
    );

    Json(BroadcastResponse { ok: true, delivered }).into_response()
}

#[derive(Debug, Serialize)]
pub struct RealtimeStatsResponse {
    pub ok: bool,
    pub total_connections: usize,
    pub tenants: usize,
    pub tenant_connections: usize,
}

pub async fn handle_realtime_stats(
    State(runtime): State<Arc<GatewayRuntime>>,
    Extension(principal): Extension<Principal>,
) -> Json<RealtimeStatsResponse> {
    let registry = runtime.registry();
    Json(RealtimeStatsResponse {
        ok: true,
        total_connections: registry.connection_count(),
        tenants: registry.tenant_count(),
        tenant_connections: registry.tenant_connection_count(&principal.tenant_id),
    })
}

/// Fallback for unmatched routes.
pub async fn handle_not_found(State(runtime): State<Arc<GatewayRuntime>>, request: Request) -> Response {
    let context = context_of(&request);
    GatewayError::NotFound(request.uri().path().to_string())
        .into_response_for(&context, runtime.config().is_production())
}
