//! Background tasks and graceful shutdown.

use crate::{
    auth::Authenticator,
    config::AppConfig,
    proxy::DownstreamProxy,
    rate_limit::{CounterStore, RateLimiter},
    realtime::{ConnectionRegistry, HeartbeatHandle},
};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{builder::GatewayRuntimeBuilder, GatewayComponents};

/// Owns the gateway components and their background tasks.
///
/// Shared by `Arc` with the HTTP layer. [`shutdown`](Self::shutdown) stops the
/// heartbeat first and then drains the realtime registry, so no socket is closed
/// while a sweep is still iterating it. The caller closes the listener afterwards.
pub struct GatewayRuntime {
    components: GatewayComponents,
    config: Arc<AppConfig>,
    shutdown_tx: broadcast::Sender<()>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_initiated: AtomicBool,
    started_at: Instant,
}

impl GatewayRuntime {
    #[must_use]
    pub fn builder() -> GatewayRuntimeBuilder {
        GatewayRuntimeBuilder::new()
    }

    pub(super) fn new(
        components: GatewayComponents,
        shutdown_tx: broadcast::Sender<()>,
        config: AppConfig,
        heartbeat: Option<HeartbeatHandle>,
        cleanup_task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            components,
            config: Arc::new(config),
            shutdown_tx,
            heartbeat: Mutex::new(heartbeat),
            cleanup_task: Mutex::new(cleanup_task),
            shutdown_initiated: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn components(&self) -> &GatewayComponents {
        &self.components
    }

    #[must_use]
    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    #[must_use]
    pub fn authenticator(&self) -> &Arc<Authenticator> {
        self.components.authenticator()
    }

    #[must_use]
    pub fn global_limiter(&self) -> &Arc<RateLimiter> {
        self.components.global_limiter()
    }

    #[must_use]
    pub fn tenant_limiter(&self) -> &Arc<RateLimiter> {
        self.components.tenant_limiter()
    }

    #[must_use]
    pub fn counter_store(&self) -> &Arc<dyn CounterStore> {
        self.components.counter_store()
    }

    #[must_use]
    pub fn proxy(&self) -> &Arc<DownstreamProxy> {
        self.components.proxy()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.components.registry()
    }

    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Creates a new shutdown receiver for external shutdown coordination.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stops background work in order: heartbeat, then registry drain, then the
    /// remaining tasks. Idempotent.
    pub async fn shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!("Initiating gateway runtime shutdown");

        let heartbeat = self.heartbeat.lock().take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.shutdown().await;
        }

        let drained = self.registry().drain();
        debug!(drained, "Realtime registry drained");

        if let Err(e) = self.shutdown_tx.send(()) {
            debug!(error = %e, "No background tasks listening for shutdown");
        }

        let cleanup_task = self.cleanup_task.lock().take();
        if let Some(task) = cleanup_task {
            match task.await {
                Ok(()) => debug!("Counter cleanup task completed"),
                Err(e) if e.is_cancelled() => debug!("Counter cleanup task cancelled"),
                Err(e) => error!(error = %e, "Counter cleanup task failed"),
            }
        }

        info!("Gateway runtime shutdown complete");
    }
}
