//! HTTP middleware for the gateway pipeline.
//!
//! These are Axum adapters over `gateway_core`: they handle request and response
//! plumbing while the core library decides. Stage order on a proxied route:
//! context → global limit → auth → tenant limit → handler.

pub mod auth;
pub mod context;
pub mod rate_limiting;

pub use auth::{auth_middleware, AuthState, RequiredScopes};
pub use context::context_middleware;
pub use rate_limiting::{global_rate_limit_middleware, tenant_rate_limit_middleware};
