//! HTTP and WebSocket front end for the tenant gateway.

pub mod error;
pub mod middleware;
pub mod router;
pub mod ws;

use axum::{
    middleware::from_fn_with_state,
    routing::{any, get, post},
    Router,
};
use gateway_core::runtime::GatewayRuntime;
use middleware::{
    auth_middleware, context_middleware, global_rate_limit_middleware, tenant_rate_limit_middleware,
    AuthState, RequiredScopes,
};
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer};

/// Builds the full router for `runtime`.
///
/// Layers added later run first, so each group below lists its stages innermost
/// first: tenant limit, auth, global limit. The context middleware wraps everything,
/// the fallback included.
pub fn create_app(runtime: Arc<GatewayRuntime>) -> Router {
    let config = runtime.config().clone();

    let global_limit = from_fn_with_state(runtime.clone(), global_rate_limit_middleware);
    let tenant_limit = from_fn_with_state(runtime.clone(), tenant_rate_limit_middleware);
    let auth = |required: RequiredScopes| {
        from_fn_with_state(AuthState::new(runtime.clone(), required), auth_middleware)
    };

    let api = Router::new()
        .route("/api/{service}", any(router::handle_proxy))
        .route("/api/{service}/{*path}", any(router::handle_proxy))
        .route_layer(tenant_limit.clone())
        .route_layer(auth(RequiredScopes::PerService))
        .route_layer(global_limit.clone());

    let broadcast = Router::new()
        .route("/realtime/broadcast", post(router::handle_broadcast))
        .route_layer(tenant_limit.clone())
        .route_layer(auth(RequiredScopes::fixed(&["realtime:publish"])))
        .route_layer(global_limit.clone());

    let broadcast_all = Router::new()
        .route("/realtime/broadcast/all", post(router::handle_broadcast_all))
        .route_layer(tenant_limit)
        .route_layer(auth(RequiredScopes::fixed(&["realtime:admin"])))
        .route_layer(global_limit.clone());

    let stats = Router::new()
        .route("/realtime/stats", get(router::handle_realtime_stats))
        .route_layer(auth(RequiredScopes::fixed(&["realtime:read"])))
        .route_layer(global_limit.clone());

    let services_health = Router::new()
        .route("/health/services", get(router::handle_services_health))
        .route_layer(global_limit);

    let rest = Router::new()
        .route("/health", get(router::handle_health))
        .merge(services_health)
        .merge(api)
        .merge(broadcast)
        .merge(broadcast_all)
        .merge(stats)
        .layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests))
        .layer(RequestBodyLimitLayer::new(config.server.max_body_bytes))
        .layer(CompressionLayer::new());

    Router::new()
        .merge(rest)
        .route(&config.realtime.path, get(ws::ws_handler))
        .fallback(router::handle_not_found)
        .layer(from_fn_with_state(runtime.clone(), context_middleware))
        .with_state(runtime)
}
