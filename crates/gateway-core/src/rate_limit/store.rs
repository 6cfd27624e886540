use super::WindowPolicy;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Counter state after one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Post-increment count, saturating at `max_requests + 1`.
    pub count: u64,
    /// Time until the current window resets.
    pub reset_after: Duration,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    #[error("Counter store operation timed out")]
    Timeout,

    #[error("Unexpected counter store reply: {0}")]
    Protocol(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(error: redis::RedisError) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Unavailable(error.to_string())
        }
    }
}

/// Fixed-window counter backend.
///
/// `increment` must be atomic per key: concurrent callers for the same key each
/// observe a distinct post-increment count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Counts one request against `key` and reports the window state.
    ///
    /// The window is anchored at the first request for the key and resets once
    /// `policy.window` has elapsed from that anchor.
    async fn increment(&self, key: &str, policy: WindowPolicy) -> Result<WindowCount, StoreError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
