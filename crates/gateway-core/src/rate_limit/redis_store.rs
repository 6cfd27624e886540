use super::{
    store::{CounterStore, StoreError, WindowCount},
    WindowPolicy,
};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::time::Duration;

/// Saturating INCR with first-hit expiry.
///
/// KEYS[1] counter key, ARGV[1] max requests, ARGV[2] window in ms.
/// Returns `{count, pttl}`. The count stops at `max + 1`.
const INCREMENT_SCRIPT: &str = r"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current <= tonumber(ARGV[1]) then
    current = redis.call('INCR', KEYS[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    ttl = tonumber(ARGV[2])
end
return {current, ttl}
";

/// Shared fixed-window counters in Redis, for multi-instance deployments.
///
/// Expiry is native: a window's key disappears when its PTTL runs out.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    script: Script,
    operation_timeout: Duration,
}

impl RedisCounterStore {
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(250);

    /// Opens a managed connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the URL is invalid or the server cannot be reached
    /// within the connect timeout.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = tokio::time::timeout(Self::CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout)??;

        Ok(Self {
            connection,
            script: Script::new(INCREMENT_SCRIPT),
            operation_timeout: Self::DEFAULT_OPERATION_TIMEOUT,
        })
    }

    /// Bounds each counter round trip so a stalled server degrades quickly.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, policy: WindowPolicy) -> Result<WindowCount, StoreError> {
        let window_ms = u64::try_from(policy.window.as_millis()).unwrap_or(u64::MAX);
        let mut connection = self.connection.clone();

        let mut invocation = self.script.key(key);
        invocation.arg(policy.max_requests).arg(window_ms);

        let (count, ttl_ms): (i64, i64) =
            tokio::time::timeout(self.operation_timeout, invocation.invoke_async(&mut connection))
                .await
                .map_err(|_| StoreError::Timeout)??;

        let count = u64::try_from(count)
            .map_err(|_| StoreError::Protocol(format!("negative counter {count}")))?;
        let reset_after = Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(window_ms));

        Ok(WindowCount { count, reset_after })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
