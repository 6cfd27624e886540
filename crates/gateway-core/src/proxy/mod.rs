//! Forwarding to named downstream services.
//!
//! One call per request, no retries. Each call runs inside a hard timeout; when it
//! fires the in-flight future is dropped, which cancels the request and releases
//! its connection. Only an allow-list of headers reaches the downstream.

pub mod errors;
pub mod health;

pub use errors::DownstreamError;
pub use health::ServiceHealth;

use crate::{
    config::DownstreamConfig,
    context::{RequestContext, CORRELATION_ID_HEADER, TENANT_ID_HEADER},
};
use bytes::Bytes;
use http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
};
use reqwest::{Client, ClientBuilder, Url};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

/// One forwarding attempt.
#[derive(Debug, Clone)]
pub struct ProxyRequestSpec {
    pub method: Method,
    pub url: String,
    pub body: Bytes,
    pub headers: HeaderMap,
    pub timeout: Duration,
}

/// Parsed downstream body.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyBody {
    Json(Value),
    Text(String),
    Empty,
}

/// A completed downstream exchange, whatever its status.
#[derive(Debug, Clone)]
pub struct ProxyResult {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: ProxyBody,
    pub timing_ms: u64,
}

/// Forwards requests to configured downstream services.
pub struct DownstreamProxy {
    client: Client,
    services: BTreeMap<String, String>,
    timeout: Duration,
    extra_headers: Vec<HeaderName>,
}

impl DownstreamProxy {
    /// Builds the proxy and its pooled HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`DownstreamError::InvalidRequest`] if the HTTP client cannot be built
    /// or a configured extra header name is invalid.
    pub fn new(config: &DownstreamConfig) -> Result<Self, DownstreamError> {
        let timeout = Duration::from_millis(config.timeout_ms);

        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("tenant-gateway/", env!("CARGO_PKG_VERSION")))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build downstream http client");
                DownstreamError::InvalidRequest(format!("HTTP client build failed: {e}"))
            })?;

        let extra_headers = config
            .extra_propagated_headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| DownstreamError::InvalidRequest(format!("bad header name {name}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let services = config
            .services
            .iter()
            .map(|(name, base)| (name.clone(), base.trim_end_matches('/').to_string()))
            .collect();

        Ok(Self { client, services, timeout, extra_headers })
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn has_service(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// Resolves `service` + `path` (+ `query`) to a downstream URL.
    ///
    /// `path` arrives percent-decoded. Each segment is appended to the base URL and
    /// encoded again, so a decoded `?`, `#` or `%` stays inside its segment.
    ///
    /// # Errors
    ///
    /// - [`DownstreamError::UnknownService`] if the service is not configured
    /// - [`DownstreamError::InvalidRequest`] if a segment is `.` or `..`, contains a
    ///   backslash, or the base URL cannot take path segments
    pub fn target_url(
        &self,
        service: &str,
        path: &str,
        query: Option<&str>,
    ) -> Result<String, DownstreamError> {
        let base = self
            .services
            .get(service)
            .ok_or_else(|| DownstreamError::UnknownService(service.to_string()))?;

        let path = path.trim_start_matches('/');
        let segments: Vec<&str> = if path.is_empty() { Vec::new() } else { path.split('/').collect() };
        if segments.iter().any(|s| matches!(*s, "." | "..") || s.contains('\\')) {
            return Err(DownstreamError::InvalidRequest("path traversal".to_string()));
        }

        let mut url = Url::parse(base)
            .map_err(|e| DownstreamError::InvalidRequest(format!("bad base url for {service}: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| DownstreamError::InvalidRequest(format!("base url for {service} cannot take a path")))?
            .pop_if_empty()
            .extend(segments);
        url.set_query(query.filter(|q| !q.is_empty()));

        Ok(url.into())
    }

    /// Selects the headers forwarded downstream.
    ///
    /// Correlation and tenant ids come from `context`; `authorization`, `content-type`
    /// and any configured extras are copied from `inbound`. Nothing else passes.
    #[must_use]
    pub fn propagated_headers(&self, inbound: &HeaderMap, context: &RequestContext) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Ok(value) = HeaderValue::from_str(context.correlation_id.as_str()) {
            headers.insert(CORRELATION_ID_HEADER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&context.tenant_id) {
            headers.insert(TENANT_ID_HEADER, value);
        }

        let always = [AUTHORIZATION, CONTENT_TYPE];
        for name in always.iter().chain(&self.extra_headers) {
            for value in inbound.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        headers
    }

    /// Builds a spec for `service` using the configured timeout.
    ///
    /// # Errors
    ///
    /// See [`target_url`](Self::target_url).
    #[allow(clippy::too_many_arguments)]
    pub fn request_spec(
        &self,
        service: &str,
        path: &str,
        query: Option<&str>,
        method: Method,
        inbound: &HeaderMap,
        body: Bytes,
        context: &RequestContext,
    ) -> Result<ProxyRequestSpec, DownstreamError> {
        Ok(ProxyRequestSpec {
            method,
            url: self.target_url(service, path, query)?,
            body,
            headers: self.propagated_headers(inbound, context),
            timeout: self.timeout,
        })
    }

    /// Sends one request and parses the response.
    ///
    /// Non-2xx downstream statuses are returned as results, not errors. The attempt is
    /// logged with tenant, correlation id, target, status and elapsed time either way.
    ///
    /// # Errors
    ///
    /// - [`DownstreamError::Timeout`] when `spec.timeout` elapses
    /// - [`DownstreamError::ConnectionFailed`] for transport failures
    /// - [`DownstreamError::ParseFailed`] when a JSON-declared body does not parse
    pub async fn forward(
        &self,
        spec: ProxyRequestSpec,
        context: &RequestContext,
    ) -> Result<ProxyResult, DownstreamError> {
        let started = Instant::now();
        let timeout_ms = u64::try_from(spec.timeout.as_millis()).unwrap_or(u64::MAX);
        let method = spec.method.clone();
        let target = spec.url.clone();

        let exchange = async {
            let response = self
                .client
                .request(spec.method, &spec.url)
                .headers(spec.headers)
                .body(spec.body)
                .send()
                .await?;
            let status = response.status();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, content_type, bytes))
        };

        let outcome = match tokio::time::timeout(spec.timeout, exchange).await {
            Ok(Ok((status, content_type, bytes))) => parse_body(status, content_type.as_deref(), &bytes)
                .map(|body| ProxyResult { status, content_type, body, timing_ms: 0 }),
            Ok(Err(e)) => Err(DownstreamError::from_transport(&e, timeout_ms)),
            Err(_) => Err(DownstreamError::Timeout { timeout_ms }),
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(mut result) => {
                result.timing_ms = elapsed_ms;
                tracing::info!(
                    tenant_id = %context.tenant_id,
                    correlation_id = %context.correlation_id,
                    method = %method,
                    target = %target,
                    status = result.status.as_u16(),
                    elapsed_ms,
                    "downstream call completed"
                );
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(
                    tenant_id = %context.tenant_id,
                    correlation_id = %context.correlation_id,
                    method = %method,
                    target = %target,
                    status = e.downstream_status(),
                    error_kind = e.kind(),
                    error = %e,
                    elapsed_ms,
                    "downstream call failed"
                );
                Err(e)
            }
        }
    }
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| {
        let essence = ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        essence == "application/json" || essence.ends_with("+json")
    })
}

fn parse_body(
    status: StatusCode,
    content_type: Option<&str>,
    bytes: &Bytes,
) -> Result<ProxyBody, DownstreamError> {
    if bytes.is_empty() {
        return Ok(ProxyBody::Empty);
    }

    if is_json(content_type) {
        return serde_json::from_slice(bytes).map(ProxyBody::Json).map_err(|e| {
            DownstreamError::ParseFailed { status: status.as_u16(), cause: e.to_string() }
        });
    }

    Ok(ProxyBody::Text(String::from_utf8_lossy(bytes).into_owned()))
}
