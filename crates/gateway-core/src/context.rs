//! Per-request correlation and tenant resolution.
//!
//! Every inbound call gets a [`RequestContext`] before any other stage runs. This stage
//! cannot reject: missing headers fall back to a generated correlation id and the
//! `"default"` tenant.

use http::HeaderMap;
use std::{fmt, net::IpAddr, sync::Arc};
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const DEFAULT_TENANT: &str = "default";

/// Opaque identifier propagated across a request's call chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Generates a new random correlation ID using UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one inbound request or connection.
///
/// `tenant_id` starts as the caller-supplied header value and is replaced by the
/// verified token's tenant once authentication succeeds.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub correlation_id: CorrelationId,
    pub tenant_id: String,
    pub source_address: IpAddr,
}

impl RequestContext {
    /// Resolves the context from inbound headers.
    ///
    /// A non-empty `x-correlation-id` is reused verbatim; otherwise a fresh id is
    /// generated. `x-tenant-id` selects the tenant, defaulting to `"default"`.
    #[must_use]
    pub fn resolve(headers: &HeaderMap, source_address: IpAddr) -> Self {
        let correlation_id = header_str(headers, CORRELATION_ID_HEADER)
            .filter(|id| !id.is_empty())
            .map_or_else(CorrelationId::generate, CorrelationId::new);

        let tenant_id = header_str(headers, TENANT_ID_HEADER)
            .map(str::trim)
            .filter(|tenant| !tenant.is_empty())
            .unwrap_or(DEFAULT_TENANT)
            .to_string();

        Self { correlation_id, tenant_id, source_address }
    }

    /// Overrides the tenant with an authoritative value.
    pub fn assign_tenant(&mut self, tenant_id: impl Into<String>) {
        self.tenant_id = tenant_id.into();
    }
}

/// Picks the rate-limit source address for a request.
///
/// With `trust_forwarded_for`, the first parseable `x-forwarded-for` entry wins;
/// otherwise, or when the header is absent or garbled, the socket peer is used.
#[must_use]
pub fn source_address(headers: &HeaderMap, peer: IpAddr, trust_forwarded_for: bool) -> IpAddr {
    if !trust_forwarded_for {
        return peer;
    }

    header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or(peer)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
