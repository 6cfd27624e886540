use anyhow::Result;
use axum::serve;
use gateway_core::{config::AppConfig, runtime::GatewayRuntime};
use rustls::crypto::{ring::default_provider, CryptoProvider};
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system based on the configuration.
///
/// `RUST_LOG` wins when set; `debug` and `trace` are shorthands scoped to the gateway
/// crates. Otherwise `logging.level` applies to the gateway crates.
fn init_logging(config: &AppConfig) {
    let scoped = |level: &str| {
        EnvFilter::new(format!("warn,gateway_core={level},server={level},tests={level}"))
    };

    let filter = match std::env::var("RUST_LOG") {
        Ok(level) if level == "debug" || level == "trace" => scoped(&level),
        Ok(_) => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| scoped(config.logging.level.as_str())),
        Err(_) => scoped(config.logging.level.as_str()),
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        // "pretty" and any other format default to pretty logging
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    CryptoProvider::install_default(default_provider())
        .map_err(|e| anyhow::anyhow!("Failed to install crypto provider: {e:?}"))?;

    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("Configuration load failed: {e}"))?;
    config.validate().map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

    init_logging(&config);
    info!(environment = %config.environment, "Starting tenant gateway");
    debug!(
        services = ?config.downstream.services.keys().collect::<Vec<_>>(),
        auth_enabled = config.auth.enabled,
        store = ?config.rate_limit.store,
        bind_port = config.server.bind_port,
        "Configuration loaded"
    );

    let addr = config.socket_addr().map_err(|e| anyhow::anyhow!(e))?;
    let runtime = Arc::new(
        GatewayRuntime::builder()
            .with_config(config)
            .build()
            .await
            .map_err(|e| anyhow::anyhow!("Runtime initialization failed: {e}"))?,
    );

    let app = server::create_app(runtime.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Gateway listening");

    let shutdown_runtime = runtime.clone();
    let result = serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_runtime.shutdown().await;
        })
        .await;

    if let Err(e) = result {
        error!(error = %e, "Server error occurred");
    }

    runtime.shutdown().await;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, draining realtime connections");
}
