use thiserror::Error;

/// Failures forwarding to a downstream service.
///
/// Everything except [`DownstreamError::UnknownService`] surfaces as `502 Bad Gateway`.
/// None of them are retried by the gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DownstreamError {
    /// The call exceeded its budget and was aborted.
    #[error("Downstream request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The downstream could not be reached or the transfer broke off.
    #[error("Downstream connection failed: {0}")]
    ConnectionFailed(String),

    /// A body declared as JSON did not parse. `status` is the downstream's status.
    #[error("Downstream returned unparseable JSON (status {status}): {cause}")]
    ParseFailed { status: u16, cause: String },

    /// No base URL is configured for the requested service.
    #[error("Unknown downstream service: {0}")]
    UnknownService(String),

    /// The forwarding request could not be built.
    #[error("Invalid downstream request: {0}")]
    InvalidRequest(String),
}

impl DownstreamError {
    /// Stable label for logs and the error envelope.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::ParseFailed { .. } => "parse_failed",
            Self::UnknownService(_) => "unknown_service",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }

    /// The downstream's own status code, when one was received.
    #[must_use]
    pub fn downstream_status(&self) -> Option<u16> {
        match self {
            Self::ParseFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Maps a transport error without leaking internal addresses.
    pub(crate) fn from_transport(error: &reqwest::Error, timeout_ms: u64) -> Self {
        if error.is_timeout() {
            return Self::Timeout { timeout_ms };
        }

        let cause = if error.is_connect() {
            "connection refused or unreachable"
        } else if error.is_request() {
            "request failed"
        } else if error.is_body() {
            "response body error"
        } else if error.is_decode() {
            "response decode error"
        } else if error.is_redirect() {
            "unexpected redirect"
        } else {
            "network error"
        };

        Self::ConnectionFailed(cause.to_string())
    }
}
