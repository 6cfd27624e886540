//! Two-tier fixed-window rate limiting.
//!
//! # Tiers
//!
//! - **Global**: keyed by source address, checked before authentication so
//!   unauthenticated floods are rejected cheaply.
//! - **Tenant**: keyed by the authenticated tenant, or by source address when no
//!   principal is available, checked after authentication.
//!
//! # Algorithm
//!
//! Each key has a window anchored at its first request. Every request increments the
//! counter; a post-increment count above `max_requests` is denied with the time left
//! until the window resets. A request after `window_start + window` starts a new
//! window. Windows do not slide, so up to `2 * max_requests` can pass across a
//! boundary.
//!
//! # Storage
//!
//! Counters live behind [`CounterStore`]:
//!
//! - [`MemoryCounterStore`]: in-process `DashMap`, the default
//! - [`RedisCounterStore`]: shared across instances via an atomic Lua script
//! - [`FallbackCounterStore`]: shared store that degrades to in-process counters
//!
//! [`build_store`] selects one from configuration at startup.

pub mod fallback;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use fallback::FallbackCounterStore;
pub use memory::MemoryCounterStore;
pub use redis_store::RedisCounterStore;
pub use store::{CounterStore, StoreError, WindowCount};

use crate::config::{CounterStoreKind, RateLimitConfig};
use std::{fmt, net::IpAddr, sync::Arc, time::Duration};
use thiserror::Error;

/// Which limiter produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitTier {
    Global,
    Tenant,
}

impl LimitTier {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Tenant => "tenant",
        }
    }
}

impl fmt::Display for LimitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// At most `max_requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub max_requests: u64,
    pub window: Duration,
}

impl WindowPolicy {
    #[must_use]
    pub const fn new(max_requests: u64, window: Duration) -> Self {
        Self { max_requests, window }
    }
}

/// Outcome of one limiter check, allowed or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub tier: LimitTier,
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
    pub window: Duration,
}

impl RateDecision {
    /// How long a denied caller should wait. `None` when allowed.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        (!self.allowed).then_some(self.reset_after)
    }

    /// Seconds until reset, rounded up, for `ratelimit-reset` and `retry-after`.
    #[must_use]
    pub fn reset_after_secs(&self) -> u64 {
        let millis = u64::try_from(self.reset_after.as_millis()).unwrap_or(u64::MAX);
        millis.div_ceil(1000)
    }

    /// Converts a denial into an error.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitExceeded`] when the decision is a denial.
    pub fn into_result(self) -> Result<Self, RateLimitExceeded> {
        if self.allowed {
            Ok(self)
        } else {
            Err(RateLimitExceeded { decision: self })
        }
    }
}

/// A denied request. Terminal: the gateway never retries it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Rate limit exceeded ({} tier)", .decision.tier)]
pub struct RateLimitExceeded {
    pub decision: RateDecision,
}

impl RateLimitExceeded {
    #[must_use]
    pub fn retry_after_ms(&self) -> u64 {
        u64::try_from(self.decision.reset_after.as_millis()).unwrap_or(u64::MAX)
    }
}

/// One tier of the fixed-window limiter.
pub struct RateLimiter {
    tier: LimitTier,
    policy: WindowPolicy,
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(tier: LimitTier, policy: WindowPolicy, store: Arc<dyn CounterStore>) -> Self {
        Self { tier, policy, store }
    }

    #[must_use]
    pub fn tier(&self) -> LimitTier {
        self.tier
    }

    #[must_use]
    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    /// Counts one request for `key` and decides.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only if the configured store itself fails; the
    /// fallback store absorbs shared-store outages.
    pub async fn check(&self, key: &str) -> Result<RateDecision, StoreError> {
        let store_key = format!("rl:{}:{key}", self.tier);
        let WindowCount { count, reset_after } = self.store.increment(&store_key, self.policy).await?;

        let allowed = count <= self.policy.max_requests;
        if !allowed {
            tracing::debug!(tier = %self.tier, key, count, "rate limit exceeded");
        }

        Ok(RateDecision {
            tier: self.tier,
            allowed,
            limit: self.policy.max_requests,
            remaining: self.policy.max_requests.saturating_sub(count),
            reset_after,
            window: self.policy.window,
        })
    }
}

/// Key for the tenant tier: the tenant when a principal is resolved, else the source.
#[must_use]
pub fn tenant_limit_key(tenant_id: Option<&str>, source_address: IpAddr) -> String {
    match tenant_id {
        Some(tenant) => format!("tenant:{tenant}"),
        None => format!("ip:{source_address}"),
    }
}

/// Key for the global tier.
#[must_use]
pub fn global_limit_key(source_address: IpAddr) -> String {
    format!("ip:{source_address}")
}

/// Builds the configured counter store.
///
/// A Redis store that cannot connect at startup is replaced by the in-process
/// store; the gateway does not refuse to start over it.
pub async fn build_store(
    config: &RateLimitConfig,
    local: Arc<MemoryCounterStore>,
) -> Arc<dyn CounterStore> {
    match (config.store, config.redis_url.as_deref()) {
        (CounterStoreKind::Redis, Some(url)) => match RedisCounterStore::connect(url).await {
            Ok(redis) => {
                tracing::info!("rate-limit counters backed by redis");
                Arc::new(FallbackCounterStore::new(Arc::new(redis), local))
            }
            Err(e) => {
                tracing::warn!(error = %e, "redis unavailable at startup, using in-process counters");
                local
            }
        },
        (CounterStoreKind::Redis, None) => {
            tracing::warn!("redis store selected without redis_url, using in-process counters");
            local
        }
        (CounterStoreKind::Memory, _) => local,
    }
}
