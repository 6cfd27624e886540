//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations and serde field defaults
//! 2. **Config file**: TOML file named by the `GATEWAY_CONFIG` env var
//! 3. **Environment variables**: `GATEWAY__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: listener settings and source-address policy
//! - [`AuthConfig`]: bearer token verification and the scope hierarchy
//! - [`RateLimitConfig`]: global and tenant windows, counter store selection
//! - [`DownstreamConfig`]: named downstream services and the forwarding budget
//! - [`RealtimeConfig`]: WebSocket path and heartbeat cadence
//! - [`LoggingConfig`]: log level and format
//!
//! # Example
//!
//! ```toml
//! environment = "production"
//!
//! [auth]
//! enabled = true
//! jwt_secret = "change-me"
//! issuer = "https://id.example.com"
//!
//! [rate_limit.tenant]
//! max_requests = 300
//! window_ms = 60000
//!
//! [downstream.services]
//! messages = "http://messages.internal:8081"
//! contacts = "http://contacts.internal:8082"
//! ```

use crate::{
    auth::scopes::default_scope_table,
    rate_limit::{LimitTier, WindowPolicy},
};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, net::SocketAddr, path::Path, time::Duration};

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind the server to. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number to listen on. Must be greater than 0. Defaults to `8080`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Derive the source address from the first `x-forwarded-for` entry.
    ///
    /// Only enable behind a proxy that overwrites the header; otherwise callers
    /// can pick their own global rate-limit key.
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Maximum accepted request body in bytes. Defaults to 1 MiB.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Maximum number of REST requests in flight. Defaults to `1000`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_max_concurrent_requests() -> usize {
    1000
}

/// Bearer token verification settings.
///
/// Tokens are verified with HS256 against `jwt_secret`; the `iss` claim must equal
/// `issuer` exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Whether authentication is enforced. Disabling it is rejected in production.
    #[serde(default)]
    pub enabled: bool,

    /// Shared HMAC secret used to verify token signatures.
    #[serde(default)]
    pub jwt_secret: String,

    /// Expected value of the `iss` claim.
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Clock skew tolerated on `exp`, in seconds. Defaults to `0`.
    #[serde(default)]
    pub leeway_seconds: u64,

    /// Scope implication table: a scope maps to the narrower scopes it grants.
    #[serde(default = "default_scope_table")]
    pub scope_hierarchy: BTreeMap<String, Vec<String>>,
}

fn default_issuer() -> String {
    "tenant-gateway".to_string()
}

/// One fixed window: at most `max_requests` per `window_ms`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowConfig {
    pub max_requests: u64,
    pub window_ms: u64,
}

impl WindowConfig {
    #[must_use]
    pub fn policy(&self) -> WindowPolicy {
        WindowPolicy::new(self.max_requests, Duration::from_millis(self.window_ms))
    }
}

/// Backing store for rate-limit counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CounterStoreKind {
    /// In-process counters. Limits are per gateway instance.
    #[default]
    Memory,
    /// Shared Redis counters with in-process fallback.
    Redis,
}

/// Two-tier rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Per source address window, applied before authentication.
    pub global: WindowConfig,

    /// Per tenant window, applied after authentication.
    pub tenant: WindowConfig,

    /// Counter backend. Defaults to `memory`.
    pub store: CounterStoreKind,

    /// Redis connection URL, required when `store = "redis"`.
    pub redis_url: Option<String>,

    /// Interval between sweeps of elapsed in-process windows.
    pub cleanup_interval_seconds: u64,

    /// Upper bound on tracked in-process keys.
    pub max_tracked_keys: usize,
}

impl RateLimitConfig {
    #[must_use]
    pub fn window(&self, tier: LimitTier) -> WindowConfig {
        match tier {
            LimitTier::Global => self.global,
            LimitTier::Tenant => self.tenant,
        }
    }
}

/// Downstream services reachable through `/api/{service}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamConfig {
    /// Hard per-call budget in milliseconds. Defaults to `5000`.
    #[serde(default = "default_downstream_timeout_ms")]
    pub timeout_ms: u64,

    /// Logical service name to base URL.
    #[serde(default)]
    pub services: BTreeMap<String, String>,

    /// Headers forwarded in addition to the fixed allow-list.
    #[serde(default)]
    pub extra_propagated_headers: Vec<String>,
}

fn default_downstream_timeout_ms() -> u64 {
    5000
}

/// Realtime endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Upgrade path. Defaults to `/ws`.
    pub path: String,

    /// Liveness probe cadence in milliseconds. Defaults to `30000`.
    pub heartbeat_interval_ms: u64,

    /// Frames buffered per connection before deliveries to it start failing.
    pub outbound_buffer: usize,
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

/// Root application configuration.
///
/// Loaded from TOML and environment variables with the `GATEWAY` prefix, using `__`
/// as the nesting separator (e.g. `GATEWAY__AUTH__JWT_SECRET`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment. `"production"` forbids disabled auth and hides
    /// internal error details. Defaults to `"development"`.
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub downstream: DownstreamConfig,

    #[serde(default)]
    pub realtime: RealtimeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            trust_forwarded_for: false,
            max_body_bytes: default_max_body_bytes(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jwt_secret: String::new(),
            issuer: default_issuer(),
            leeway_seconds: 0,
            scope_hierarchy: default_scope_table(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global: WindowConfig { max_requests: 1000, window_ms: 60_000 },
            tenant: WindowConfig { max_requests: 100, window_ms: 60_000 },
            store: CounterStoreKind::Memory,
            redis_url: None,
            cleanup_interval_seconds: 60,
            max_tracked_keys: 100_000,
        }
    }
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_downstream_timeout_ms(),
            services: BTreeMap::new(),
            extra_propagated_headers: Vec::new(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self { path: "/ws".to_string(), heartbeat_interval_ms: 30_000, outbound_buffer: 256 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            downstream: DownstreamConfig::default(),
            realtime: RealtimeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; compiled defaults apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("environment", "development")?
            .set_default("server.bind_address", "127.0.0.1")?
            .set_default("server.bind_port", 8080)?
            .set_default("auth.enabled", false)?
            .set_default("downstream.timeout_ms", 5000)?
            .set_default("realtime.path", "/ws")?
            .set_default("realtime.heartbeat_interval_ms", 30_000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("downstream.extra_propagated_headers")
                    .try_parsing(true),
            )
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml`, or the path in `GATEWAY_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Returns the listener address.
    ///
    /// # Errors
    ///
    /// Returns an error string if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port).parse().map_err(|_| {
            format!("Invalid socket address: {}:{}", self.server.bind_address, self.server.bind_port)
        })
    }

    #[must_use]
    pub fn downstream_timeout(&self) -> Duration {
        Duration::from_millis(self.downstream.timeout_ms)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.realtime.heartbeat_interval_ms)
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }

        if self.server.max_concurrent_requests == 0 {
            return Err("server.max_concurrent_requests must be greater than 0".to_string());
        }

        if self.auth.enabled && self.auth.jwt_secret.is_empty() {
            return Err("auth.jwt_secret must be set when authentication is enabled".to_string());
        }

        if !self.auth.enabled && self.is_production() {
            return Err("Authentication cannot be disabled in production".to_string());
        }

        if self.auth.issuer.is_empty() {
            return Err("auth.issuer must not be empty".to_string());
        }

        for (name, window) in [("global", self.rate_limit.global), ("tenant", self.rate_limit.tenant)]
        {
            if window.max_requests == 0 {
                return Err(format!("rate_limit.{name}.max_requests must be greater than 0"));
            }
            if window.window_ms == 0 {
                return Err(format!("rate_limit.{name}.window_ms must be greater than 0"));
            }
        }

        if self.rate_limit.store == CounterStoreKind::Redis &&
            self.rate_limit.redis_url.as_deref().is_none_or(str::is_empty)
        {
            return Err("rate_limit.redis_url is required when store = \"redis\"".to_string());
        }

        if self.rate_limit.cleanup_interval_seconds == 0 {
            return Err("rate_limit.cleanup_interval_seconds must be greater than 0".to_string());
        }

        if self.downstream.timeout_ms == 0 {
            return Err("downstream.timeout_ms must be greater than 0".to_string());
        }

        for (name, url) in &self.downstream.services {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("Invalid base URL for downstream service {name}: {url}"));
            }
        }

        for header in &self.downstream.extra_propagated_headers {
            if http::HeaderName::from_bytes(header.as_bytes()).is_err() {
                return Err(format!("Invalid propagated header name: {header}"));
            }
        }

        if !self.realtime.path.starts_with('/') {
            return Err("realtime.path must start with '/'".to_string());
        }

        if self.realtime.heartbeat_interval_ms == 0 {
            return Err("realtime.heartbeat_interval_ms must be greater than 0".to_string());
        }

        if self.realtime.outbound_buffer == 0 {
            return Err("realtime.outbound_buffer must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
