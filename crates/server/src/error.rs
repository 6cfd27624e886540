//! Gateway error taxonomy and the JSON envelope every rejection is written as.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use gateway_core::{
    auth::AuthError, context::RequestContext, proxy::DownstreamError, rate_limit::RateLimitExceeded,
};
use serde::Serialize;
use thiserror::Error;

use crate::middleware::rate_limiting::apply_rate_limit_headers;

/// Message returned in place of internal error details in production.
const SUPPRESSED_INTERNAL_MESSAGE: &str = "Internal server error";

/// Every way the gateway rejects a request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    #[error(transparent)]
    Downstream(#[from] DownstreamError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(e) if e.is_forbidden() => StatusCode::FORBIDDEN,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Downstream(DownstreamError::UnknownService(_)) | Self::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Downstream(DownstreamError::InvalidRequest(_)) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Downstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code carried in the envelope.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(AuthError::MissingOrMalformed) => "missing_credentials",
            Self::Auth(AuthError::InsufficientScope { .. }) => "insufficient_scope",
            Self::Auth(_) => "invalid_token",
            Self::RateLimited(_) => "rate_limited",
            Self::Downstream(e) => e.kind(),
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::Internal(_) => "internal",
        }
    }

    /// Builds the envelope for this error. `production` hides internal messages.
    #[must_use]
    pub fn envelope(&self, context: &RequestContext, production: bool) -> ErrorEnvelope {
        let error = match self {
            Self::Internal(_) if production => SUPPRESSED_INTERNAL_MESSAGE.to_string(),
            _ => self.to_string(),
        };

        let mut envelope = ErrorEnvelope {
            ok: false,
            error,
            code: self.code(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            correlation_id: context.correlation_id.to_string(),
            tenant_id: context.tenant_id.clone(),
            retry_after: None,
            limit: None,
            window_ms: None,
            required_scopes: None,
            user_scopes: None,
            downstream_status: None,
        };

        match self {
            Self::RateLimited(exceeded) => {
                envelope.retry_after = Some(exceeded.retry_after_ms());
                envelope.limit = Some(exceeded.decision.limit);
                envelope.window_ms =
                    Some(u64::try_from(exceeded.decision.window.as_millis()).unwrap_or(u64::MAX));
            }
            Self::Auth(AuthError::InsufficientScope { required, held }) => {
                envelope.required_scopes = Some(required.clone());
                envelope.user_scopes = Some(held.clone());
            }
            Self::Downstream(e) => envelope.downstream_status = e.downstream_status(),
            _ => {}
        }

        envelope
    }

    /// Renders the error as a response. Rate-limit denials also carry the limit
    /// headers and `retry-after`.
    #[must_use]
    pub fn into_response_for(self, context: &RequestContext, production: bool) -> Response {
        let status = self.status_code();
        let envelope = self.envelope(context, production);
        let mut response = (status, Json(envelope)).into_response();

        if let Self::RateLimited(exceeded) = &self {
            apply_rate_limit_headers(response.headers_mut(), &exceeded.decision, true);
            if let Ok(value) = HeaderValue::from_str(&exceeded.decision.reset_after_secs().to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }

        response
    }
}

/// JSON body of every rejection.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: String,
    pub code: &'static str,
    pub timestamp: String,
    pub correlation_id: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_scopes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_scopes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downstream_status: Option<u16>,
}
