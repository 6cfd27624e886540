//! # Gateway Core
//!
//! Transport-agnostic core of the multi-tenant API gateway.
//!
//! - **[`context`]**: correlation id and tenant resolution for every inbound call.
//!
//! - **[`auth`]**: bearer token verification and hierarchical scope checks.
//!
//! - **[`rate_limit`]**: two-tier fixed-window limiting over pluggable counter stores
//!   (in-process or Redis with in-process fallback).
//!
//! - **[`proxy`]**: timeout-bounded forwarding to named downstream services with a
//!   header allow-list, plus downstream health probes.
//!
//! - **[`realtime`]**: registry of live WebSocket connections indexed by tenant, with
//!   a two-tick heartbeat.
//!
//! - **[`runtime`]**: builds all of the above from [`config::AppConfig`] and shuts
//!   them down in order.
//!
//! ## Request Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌──────────────┐
//! │   Context    │  correlation id, tenant, source address
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │ Global limit │ ─── Denied ──► 429
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │     Auth     │ ─── Failed ──► 401 / 403
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │ Tenant limit │ ─── Denied ──► 429
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │    Proxy     │ ─── Timeout / unreachable / bad JSON ──► 502
//! └──────┬───────┘
//!        ▼
//!   Downstream response
//! ```

pub mod auth;
pub mod config;
pub mod context;
pub mod proxy;
pub mod rate_limit;
pub mod realtime;
pub mod runtime;
