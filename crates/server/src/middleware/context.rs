//! Request context middleware.
//!
//! Outermost stage of every route. Resolves the [`RequestContext`], stores it in the
//! request extensions, echoes `x-correlation-id` and `x-tenant-id` on the response,
//! logs completion, and turns a panicking handler into a 500 envelope. Plain 405 and
//! 413 answers from the routing and body-limit layers are rewritten as envelopes.

use crate::{error::GatewayError, router::DownstreamResponse};
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{
        header::{ALLOW, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, StatusCode,
    },
    middleware::Next,
    response::Response,
};
use futures::FutureExt;
use gateway_core::{
    config::AppConfig,
    context::{source_address, RequestContext, CORRELATION_ID_HEADER, TENANT_ID_HEADER},
    runtime::GatewayRuntime,
};
use std::{
    any::Any,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Instant,
};
use tracing::Instrument;

/// Resolves the context and wraps the rest of the stack.
pub async fn context_middleware(
    State(runtime): State<Arc<GatewayRuntime>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    let config = runtime.config();

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |ConnectInfo(addr)| addr.ip());
    let source = source_address(request.headers(), peer, config.server.trust_forwarded_for);
    let context = RequestContext::resolve(request.headers(), source);

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    request.extensions_mut().insert(context.clone());

    let span = tracing::info_span!(
        "request",
        correlation_id = %context.correlation_id,
        method = %method,
        path = %path,
    );

    let outcome = AssertUnwindSafe(next.run(request)).catch_unwind().instrument(span).await;

    let mut response = match outcome {
        Ok(response) => envelope_plain_rejection(response, &method, &context, config),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(
                correlation_id = %context.correlation_id,
                tenant_id = %context.tenant_id,
                panic = %message,
                "handler panicked"
            );
            GatewayError::Internal(message).into_response_for(&context, config.is_production())
        }
    };

    // Inner stages set x-tenant-id once a token has fixed the tenant.
    echo_header(&mut response, CORRELATION_ID_HEADER, context.correlation_id.as_str());
    echo_header(&mut response, TENANT_ID_HEADER, &context.tenant_id);

    let tenant_id = response
        .headers()
        .get(TENANT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&context.tenant_id)
        .to_string();

    tracing::info!(
        correlation_id = %context.correlation_id,
        tenant_id = %tenant_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "request completed"
    );

    response
}

/// Envelopes a bare 405 or 413. Downstream responses and JSON bodies pass through.
fn envelope_plain_rejection(
    response: Response,
    method: &Method,
    context: &RequestContext,
    config: &AppConfig,
) -> Response {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if is_json || response.extensions().get::<DownstreamResponse>().is_some() {
        return response;
    }

    let error = match response.status() {
        StatusCode::PAYLOAD_TOO_LARGE => {
            GatewayError::PayloadTooLarge { limit: config.server.max_body_bytes }
        }
        StatusCode::METHOD_NOT_ALLOWED => GatewayError::MethodNotAllowed(method.to_string()),
        _ => return response,
    };

    let allow = response.headers().get(ALLOW).cloned();
    let mut rewritten = error.into_response_for(context, config.is_production());
    if let Some(allow) = allow {
        rewritten.headers_mut().insert(ALLOW, allow);
    }
    rewritten
}

fn echo_header(response: &mut Response, name: &'static str, value: &str) {
    if response.headers().contains_key(name) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(HeaderName::from_static(name), value);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

/// The context resolved for `request`, or a fresh one if the middleware did not run.
pub(crate) fn context_of<B>(request: &axum::http::Request<B>) -> RequestContext {
    request.extensions().get::<RequestContext>().cloned().unwrap_or_else(|| {
        RequestContext::resolve(request.headers(), IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    })
}
