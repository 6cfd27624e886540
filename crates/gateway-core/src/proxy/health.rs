use super::{DownstreamError, DownstreamProxy};
use futures::future::join_all;
use serde::Serialize;
use std::time::Instant;

const HEALTH_PATH: &str = "health";

/// Result of probing one downstream's health endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServiceHealth {
    pub service: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownstreamProxy {
    /// Probes `GET <base>/health` for one service. A 2xx answer is healthy.
    ///
    /// The probe shares the forwarding timeout and never fails: transport problems
    /// are reported in the returned [`ServiceHealth`].
    pub async fn check_health(&self, service: &str) -> ServiceHealth {
        let started = Instant::now();
        let latency = |started: Instant| u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let url = match self.target_url(service, HEALTH_PATH, None) {
            Ok(url) => url,
            Err(e) => {
                return ServiceHealth {
                    service: service.to_string(),
                    healthy: false,
                    status: None,
                    latency_ms: 0,
                    error: Some(e.to_string()),
                }
            }
        };

        let timeout = self.timeout();
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let probe = tokio::time::timeout(timeout, self.client.get(&url).send()).await;

        let (status, error) = match probe {
            Ok(Ok(response)) => (Some(response.status().as_u16()), None),
            Ok(Err(e)) => (None, Some(DownstreamError::from_transport(&e, timeout_ms).to_string())),
            Err(_) => (None, Some(DownstreamError::Timeout { timeout_ms }.to_string())),
        };

        let healthy = status.is_some_and(|code| (200..300).contains(&code));
        if !healthy {
            tracing::warn!(service, status, error = error.as_deref(), "downstream health check failed");
        }

        ServiceHealth { service: service.to_string(), healthy, status, latency_ms: latency(started), error }
    }

    /// Probes every configured service concurrently, in name order.
    pub async fn check_all(&self) -> Vec<ServiceHealth> {
        join_all(self.service_names().into_iter().map(|service| self.check_health(service))).await
    }
}
