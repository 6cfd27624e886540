//! Integration Tests for the Tenant Gateway
//!
//! Every test serves the full router on an ephemeral local port and talks to it over
//! real sockets. Downstream services are mockito servers.
//!
//! - `pipeline_tests`: context echo, fixed-window limits, error envelopes, service health
//! - `auth_tests`: bearer verification, scope hierarchy, tenant override
//! - `proxy_tests`: forwarding, status pass-through, timeouts
//! - `realtime_tests`: WebSocket registration, tenant broadcast, heartbeat, drain
//! - `mock_infrastructure`: the gateway harness, downstream doubles and token minting
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod pipeline_tests;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod auth_tests;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod proxy_tests;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod realtime_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
