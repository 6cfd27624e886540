//! The gateway served on a real socket.

use super::tokens::{TEST_ISSUER, TEST_SECRET};
use gateway_core::{
    config::{AppConfig, AuthConfig},
    runtime::GatewayRuntime,
};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, task::JoinHandle};

/// Config with authentication enabled against the test secret.
#[must_use]
pub fn gateway_config() -> AppConfig {
    AppConfig {
        auth: AuthConfig {
            enabled: true,
            jwt_secret: TEST_SECRET.to_string(),
            issuer: TEST_ISSUER.to_string(),
            ..AuthConfig::default()
        },
        ..AppConfig::default()
    }
}

/// A running gateway bound to `127.0.0.1` on an ephemeral port.
pub struct TestGateway {
    addr: SocketAddr,
    runtime: Arc<GatewayRuntime>,
    server_handle: JoinHandle<()>,
}

impl TestGateway {
    /// Builds the runtime from `config` and serves the full router.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be built or no port can be bound.
    pub async fn spawn(config: AppConfig) -> io::Result<Self> {
        let runtime = Arc::new(
            GatewayRuntime::builder().with_config(config).build().await.map_err(io::Error::other)?,
        );

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = server::create_app(runtime.clone());

        let server_handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await;
        });

        Ok(Self { addr, runtime, server_handle })
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    #[must_use]
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.addr)
    }

    #[must_use]
    pub fn runtime(&self) -> &Arc<GatewayRuntime> {
        &self.runtime
    }

    /// Runs the runtime's shutdown sequence, then stops serving.
    pub async fn shutdown(self) {
        self.runtime.shutdown().await;
        self.server_handle.abort();
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}
