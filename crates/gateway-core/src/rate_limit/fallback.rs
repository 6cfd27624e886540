use super::{
    memory::MemoryCounterStore,
    store::{CounterStore, StoreError, WindowCount},
    WindowPolicy,
};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared store with in-process fallback.
///
/// When the shared store errors, the request is counted locally instead of failing.
/// Limits are then per-instance until the shared store answers again.
pub struct FallbackCounterStore {
    shared: Arc<dyn CounterStore>,
    local: Arc<MemoryCounterStore>,
    degraded: AtomicBool,
}

impl FallbackCounterStore {
    #[must_use]
    pub fn new(shared: Arc<dyn CounterStore>, local: Arc<MemoryCounterStore>) -> Self {
        Self { shared, local, degraded: AtomicBool::new(false) }
    }

    /// Whether the last shared-store call failed.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CounterStore for FallbackCounterStore {
    async fn increment(&self, key: &str, policy: WindowPolicy) -> Result<WindowCount, StoreError> {
        match self.shared.increment(key, policy).await {
            Ok(count) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!(store = self.shared.name(), "shared counter store recovered");
                }
                Ok(count)
            }
            Err(e) => {
                if self.degraded.swap(true, Ordering::Relaxed) {
                    tracing::debug!(error = %e, "shared counter store still failing, counting locally");
                } else {
                    tracing::warn!(
                        store = self.shared.name(),
                        error = %e,
                        "shared counter store failed, degrading to in-process counters"
                    );
                }
                self.local.increment(key, policy).await
            }
        }
    }

    fn name(&self) -> &'static str {
        if self.is_degraded() {
            self.local.name()
        } else {
            self.shared.name()
        }
    }
}
