use crate::{error::GatewayError, middleware::context::context_of};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use gateway_core::{context::TENANT_ID_HEADER, proxy::DownstreamError, runtime::GatewayRuntime};
use std::sync::Arc;

/// Scopes a route requires.
#[derive(Debug, Clone)]
pub enum RequiredScopes {
    /// The same scopes for every request.
    Fixed(Vec<String>),
    /// `{service}:read` for safe methods and `{service}:write` otherwise, where
    /// `{service}` is the segment after `/api/`.
    PerService,
}

impl RequiredScopes {
    pub fn fixed(scopes: &[&str]) -> Self {
        Self::Fixed(scopes.iter().map(|scope| (*scope).to_string()).collect())
    }

    fn resolve(&self, method: &Method, path: &str) -> Option<Vec<String>> {
        match self {
            Self::Fixed(scopes) => Some(scopes.clone()),
            Self::PerService => {
                let service = service_segment(path)?;
                let access = if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) {
                    "read"
                } else {
                    "write"
                };
                Some(vec![format!("{service}:{access}")])
            }
        }
    }
}

/// `messages` from `/api/messages/v1/threads`.
pub(crate) fn service_segment(path: &str) -> Option<&str> {
    path.strip_prefix("/api/")?.split('/').next().filter(|service| !service.is_empty())
}

/// State for [`auth_middleware`].
#[derive(Clone)]
pub struct AuthState {
    pub runtime: Arc<GatewayRuntime>,
    pub required: RequiredScopes,
}

impl AuthState {
    #[must_use]
    pub fn new(runtime: Arc<GatewayRuntime>, required: RequiredScopes) -> Self {
        Self { runtime, required }
    }
}

/// Verifies the bearer token and the route's scopes.
///
/// On success the [`Principal`](gateway_core::auth::Principal) and the updated
/// [`RequestContext`](gateway_core::context::RequestContext) are stored in the request
/// extensions, and the response carries the token's tenant in `x-tenant-id`.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let mut context = context_of(&request);
    let production = state.runtime.config().is_production();
    let path = request.uri().path().to_string();

    if matches!(state.required, RequiredScopes::PerService) {
        if let Some(service) = service_segment(&path) {
            if !state.runtime.proxy().has_service(service) {
                let error = DownstreamError::UnknownService(service.to_string());
                return GatewayError::from(error).into_response_for(&context, production);
            }
        }
    }

    let Some(required) = state.required.resolve(request.method(), &path) else {
        return GatewayError::NotFound(path).into_response_for(&context, production);
    };

    let authorization = request.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let principal =
        match state.runtime.authenticator().authenticate(authorization, &mut context, &required) {
            Ok(principal) => principal,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    tenant_id = %context.tenant_id,
                    correlation_id = %context.correlation_id,
                    path = %path,
                    "authentication failed"
                );
                return GatewayError::from(e).into_response_for(&context, production);
            }
        };

    tracing::debug!(
        user_id = %principal.user_id,
        tenant_id = %principal.tenant_id,
        correlation_id = %context.correlation_id,
        "request authenticated"
    );

    let tenant_header = HeaderValue::from_str(&principal.tenant_id).ok();
    request.extensions_mut().insert(principal);
    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;
    if let Some(value) = tenant_header {
        response.headers_mut().insert(TENANT_ID_HEADER, value);
    }
    response
}
