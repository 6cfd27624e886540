//! Builder that wires gateway components from configuration.

use crate::{
    auth::Authenticator,
    config::AppConfig,
    proxy::{DownstreamError, DownstreamProxy},
    rate_limit::{build_store, LimitTier, MemoryCounterStore, RateLimiter},
    realtime::ConnectionRegistry,
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{lifecycle::GatewayRuntime, GatewayComponents};

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// The downstream proxy could not be built
    #[error("Downstream proxy initialization failed: {0}")]
    Downstream(#[from] DownstreamError),
}

#[derive(Clone)]
struct RuntimeOptions {
    enable_heartbeat: bool,
    enable_counter_cleanup: bool,
    shutdown_channel_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { enable_heartbeat: true, enable_counter_cleanup: true, shutdown_channel_capacity: 16 }
    }
}

/// Builder for [`GatewayRuntime`].
///
/// # Examples
///
/// ```no_run
/// # use gateway_core::{config::AppConfig, runtime::GatewayRuntime};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AppConfig::load()?;
///
/// let runtime = GatewayRuntime::builder().with_config(config).build().await?;
/// # Ok(())
/// # }
/// ```
pub struct GatewayRuntimeBuilder {
    config: Option<AppConfig>,
    options: RuntimeOptions,
}

impl GatewayRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { config: None, options: RuntimeOptions::default() }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Skips the realtime heartbeat task. Tests drive sweeps by hand.
    #[must_use]
    pub fn disable_heartbeat(mut self) -> Self {
        self.options.enable_heartbeat = false;
        self
    }

    #[must_use]
    pub fn disable_counter_cleanup(mut self) -> Self {
        self.options.enable_counter_cleanup = false;
        self
    }

    /// Builds every component and starts background tasks.
    ///
    /// A Redis counter store that cannot be reached is not an error; the in-process
    /// store is used instead.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the configuration is missing or invalid, or the
    /// downstream HTTP client cannot be built.
    pub async fn build(self) -> Result<GatewayRuntime, RuntimeError> {
        let config = self
            .config
            .ok_or_else(|| RuntimeError::ConfigValidation("No configuration provided".to_string()))?;

        config.validate().map_err(RuntimeError::ConfigValidation)?;

        info!(
            environment = %config.environment,
            auth_enabled = config.auth.enabled,
            counter_store = ?config.rate_limit.store,
            services = config.downstream.services.len(),
            "Initializing gateway runtime"
        );

        let (shutdown_tx, _) = broadcast::channel::<()>(self.options.shutdown_channel_capacity);

        let authenticator = Arc::new(Authenticator::new(&config.auth));
        debug!(scopes = config.auth.scope_hierarchy.len(), "Authenticator initialized");

        let local_counters = Arc::new(MemoryCounterStore::with_max_keys(config.rate_limit.max_tracked_keys));
        let cleanup_task = self.options.enable_counter_cleanup.then(|| {
            local_counters.start_cleanup_task(
                Duration::from_secs(config.rate_limit.cleanup_interval_seconds),
                shutdown_tx.subscribe(),
            )
        });

        let store = build_store(&config.rate_limit, local_counters).await;
        let global_limiter = Arc::new(RateLimiter::new(
            LimitTier::Global,
            config.rate_limit.window(LimitTier::Global).policy(),
            store.clone(),
        ));
        let tenant_limiter = Arc::new(RateLimiter::new(
            LimitTier::Tenant,
            config.rate_limit.window(LimitTier::Tenant).policy(),
            store.clone(),
        ));
        debug!(store = store.name(), "Rate limiters initialized");

        let proxy = Arc::new(DownstreamProxy::new(&config.downstream)?);
        debug!(services = ?proxy.service_names(), "Downstream proxy initialized");

        let registry = Arc::new(ConnectionRegistry::new(config.realtime.outbound_buffer));
        let heartbeat = self
            .options
            .enable_heartbeat
            .then(|| registry.start_heartbeat(config.heartbeat_interval()));

        let components = GatewayComponents::new(
            authenticator,
            global_limiter,
            tenant_limiter,
            store,
            proxy,
            registry,
        );
        let runtime = GatewayRuntime::new(components, shutdown_tx, config, heartbeat, cleanup_task);

        info!("Gateway runtime initialization complete");

        Ok(runtime)
    }
}

impl Default for GatewayRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
