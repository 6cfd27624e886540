//! Gateway runtime: component wiring and ordered shutdown.

mod builder;
mod lifecycle;

pub use builder::{GatewayRuntimeBuilder, RuntimeError};
pub use lifecycle::GatewayRuntime;

use crate::{
    auth::Authenticator,
    proxy::DownstreamProxy,
    rate_limit::{CounterStore, RateLimiter},
    realtime::ConnectionRegistry,
};
use std::sync::Arc;

/// Every initialized gateway component, shared by `Arc`.
#[derive(Clone)]
pub struct GatewayComponents {
    authenticator: Arc<Authenticator>,
    global_limiter: Arc<RateLimiter>,
    tenant_limiter: Arc<RateLimiter>,
    counter_store: Arc<dyn CounterStore>,
    proxy: Arc<DownstreamProxy>,
    registry: Arc<ConnectionRegistry>,
}

impl GatewayComponents {
    #[must_use]
    pub fn new(
        authenticator: Arc<Authenticator>,
        global_limiter: Arc<RateLimiter>,
        tenant_limiter: Arc<RateLimiter>,
        counter_store: Arc<dyn CounterStore>,
        proxy: Arc<DownstreamProxy>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self { authenticator, global_limiter, tenant_limiter, counter_store, proxy, registry }
    }

    #[must_use]
    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }

    #[must_use]
    pub fn global_limiter(&self) -> &Arc<RateLimiter> {
        &self.global_limiter
    }

    #[must_use]
    pub fn tenant_limiter(&self) -> &Arc<RateLimiter> {
        &self.tenant_limiter
    }

    /// The store both limiters count in.
    #[must_use]
    pub fn counter_store(&self) -> &Arc<dyn CounterStore> {
        &self.counter_store
    }

    #[must_use]
    pub fn proxy(&self) -> &Arc<DownstreamProxy> {
        &self.proxy
    }

    /// The process-wide realtime registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}
