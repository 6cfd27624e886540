use crate::{error::GatewayError, middleware::context::context_of};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use gateway_core::{
    auth::Principal,
    rate_limit::{global_limit_key, tenant_limit_key, RateDecision, RateLimiter},
    runtime::GatewayRuntime,
};
use std::sync::Arc;

pub static RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub static RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub static RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Sets the `ratelimit-*` headers from `decision`.
///
/// With `overwrite == false` existing values are kept, so an inner tier's headers
/// survive the outer tier.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateDecision, overwrite: bool) {
    let values = [
        (&RATELIMIT_LIMIT, decision.limit),
        (&RATELIMIT_REMAINING, decision.remaining),
        (&RATELIMIT_RESET, decision.reset_after_secs()),
    ];

    for (name, value) in values {
        if overwrite || !headers.contains_key(name) {
            headers.insert(name.clone(), HeaderValue::from(value));
        }
    }
}

/// Global tier, keyed by source address. Runs before authentication.
pub async fn global_rate_limit_middleware(
    State(runtime): State<Arc<GatewayRuntime>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = global_limit_key(context_of(&request).source_address);
    enforce(&runtime, runtime.global_limiter(), &key, request, next, false).await
}

/// Tenant tier, keyed by the authenticated tenant or the source address. Runs after
/// authentication; its headers replace the global tier's.
pub async fn tenant_rate_limit_middleware(
    State(runtime): State<Arc<GatewayRuntime>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let context = context_of(&request);
    let tenant = request.extensions().get::<Principal>().map(|principal| principal.tenant_id.as_str());
    let key = tenant_limit_key(tenant, context.source_address);
    enforce(&runtime, runtime.tenant_limiter(), &key, request, next, true).await
}

async fn enforce(
    runtime: &GatewayRuntime,
    limiter: &RateLimiter,
    key: &str,
    request: Request<Body>,
    next: Next,
    overwrite: bool,
) -> Response {
    let context = context_of(&request);

    let decision = match limiter.check(key).await {
        Ok(decision) => decision,
        Err(e) => {
            // Fail open: a store fault never rejects a request.
            tracing::error!(
                tier = %limiter.tier(),
                error = %e,
                correlation_id = %context.correlation_id,
                "rate-limit store failed, allowing request"
            );
            return next.run(request).await;
        }
    };

    match decision.into_result() {
        Ok(decision) => {
            let mut response = next.run(request).await;
            apply_rate_limit_headers(response.headers_mut(), &decision, overwrite);
            response
        }
        Err(exceeded) => {
            tracing::warn!(
                tier = %limiter.tier(),
                key,
                tenant_id = %context.tenant_id,
                correlation_id = %context.correlation_id,
                retry_after_ms = exceeded.retry_after_ms(),
                "rate limit exceeded"
            );
            GatewayError::from(exceeded).into_response_for(&context, runtime.config().is_production())
        }
    }
}
