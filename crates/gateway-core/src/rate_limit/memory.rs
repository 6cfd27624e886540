use super::{
    store::{CounterStore, StoreError, WindowCount},
    WindowPolicy,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, task::JoinHandle, time::Instant};

/// In-process fixed-window counters.
///
/// **Security**: Limits maximum tracked keys to prevent OOM from spoofed source
/// addresses. At capacity, elapsed windows are purged first; if none can be freed,
/// new keys are counted as already over their limit.
pub struct MemoryCounterStore {
    windows: Arc<DashMap<String, Window>>,
    max_keys: usize,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    started: Instant,
    length: Duration,
}

impl Window {
    fn ends_at(&self) -> Instant {
        self.started + self.length
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCounterStore {
    const DEFAULT_MAX_KEYS: usize = 100_000;

    #[must_use]
    pub fn new() -> Self {
        Self::with_max_keys(Self::DEFAULT_MAX_KEYS)
    }

    #[must_use]
    pub fn with_max_keys(max_keys: usize) -> Self {
        Self { windows: Arc::new(DashMap::new()), max_keys }
    }

    /// Periodically drops windows that have fully elapsed.
    pub fn start_cleanup_task(
        &self,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let windows = self.windows.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = purge(&windows, Instant::now());
                        if removed > 0 {
                            tracing::debug!(removed, remaining = windows.len(), "purged elapsed rate-limit windows");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("rate-limit cleanup task stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Removes elapsed windows and returns how many were dropped.
    #[must_use]
    pub fn cleanup_elapsed(&self) -> usize {
        purge(&self.windows, Instant::now())
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        self.windows.len()
    }

    #[must_use]
    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    /// Current count for `key`, if tracked.
    #[doc(hidden)]
    #[must_use]
    pub fn count_for(&self, key: &str) -> Option<u64> {
        self.windows.get(key).map(|window| window.count)
    }

    fn count(&self, key: &str, policy: WindowPolicy, now: Instant) -> WindowCount {
        if !self.windows.contains_key(key) &&
            self.windows.len() >= self.max_keys &&
            purge(&self.windows, now) == 0
        {
            tracing::warn!(max_keys = self.max_keys, "rate-limit key capacity reached");
            return WindowCount { count: policy.max_requests + 1, reset_after: policy.window };
        }

        let mut window = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
            length: policy.window,
        });

        if now >= window.ends_at() {
            *window = Window { count: 0, started: now, length: policy.window };
        }

        window.count = (window.count + 1).min(policy.max_requests + 1);

        WindowCount {
            count: window.count,
            reset_after: window.ends_at().saturating_duration_since(now),
        }
    }
}

fn purge(windows: &DashMap<String, Window>, now: Instant) -> usize {
    let before = windows.len();
    windows.retain(|_, window| now < window.ends_at());
    before.saturating_sub(windows.len())
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, policy: WindowPolicy) -> Result<WindowCount, StoreError> {
        Ok(self.count(key, policy, Instant::now()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
