use super::ConnectionRegistry;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

/// Cancelable handle to a running heartbeat task.
pub struct HeartbeatHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Signals the task to stop after its current sweep.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Cancels and waits for the task to exit.
    pub async fn shutdown(self) {
        self.cancel();
        match self.task.await {
            Ok(()) => tracing::debug!("heartbeat task stopped"),
            Err(e) if e.is_cancelled() => tracing::debug!("heartbeat task cancelled"),
            Err(e) => tracing::error!(error = %e, "heartbeat task failed"),
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl ConnectionRegistry {
    /// Starts the periodic liveness sweep.
    ///
    /// The first tick fires one `interval` after start. Sweeps run inline in the task
    /// loop, so a slow sweep delays the next tick instead of overlapping it.
    pub fn start_heartbeat(self: &Arc<Self>, interval: Duration) -> HeartbeatHandle {
        let (cancel, mut cancelled) = watch::channel(false);
        let registry = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = cancelled.changed() => {
                        if changed.is_err() || *cancelled.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let report = registry.sweep();
                        if report.evicted > 0 {
                            tracing::info!(
                                evicted = report.evicted,
                                remaining = report.probed,
                                "heartbeat evicted unresponsive connections"
                            );
                        } else {
                            tracing::trace!(probed = report.probed, "heartbeat sweep");
                        }
                    }
                }
            }
        });

        tracing::debug!(interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX), "heartbeat started");
        HeartbeatHandle { cancel, task }
    }
}
