//! Downstream service doubles.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::Value;
use std::net::SocketAddr;
use tokio::{net::TcpListener, task::JoinHandle};

/// A mockito server standing in for one downstream service.
pub struct DownstreamMock {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl DownstreamMock {
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    /// Base URL to register under `downstream.services`.
    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Answers `method path` with a JSON body.
    pub fn mock_json(&mut self, method: &str, path: &str, status: usize, body: &Value) -> &mut Self {
        let mock = self
            .server
            .mock(method, path)
            .match_query(Matcher::Any)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create();
        self.mocks.push(mock);
        self
    }

    /// Answers `method path` only when `header` carries `value`.
    pub fn mock_json_with_header(
        &mut self,
        method: &str,
        path: &str,
        header: &str,
        value: &str,
        body: &Value,
    ) -> &mut Self {
        let mock = self
            .server
            .mock(method, path)
            .match_header(header, value)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create();
        self.mocks.push(mock);
        self
    }

    /// Answers `GET /health` with `status`.
    pub fn mock_health(&mut self, status: usize) -> &mut Self {
        let mock = self.server.mock("GET", "/health").with_status(status).create();
        self.mocks.push(mock);
        self
    }

    /// Asserts every registered mock was hit as expected.
    pub fn assert_all(&self) {
        for mock in &self.mocks {
            mock.assert();
        }
    }
}

/// Binds a listener that accepts connections and never writes a response.
///
/// # Errors
///
/// Returns an error if no local port can be bound.
pub async fn unresponsive_downstream() -> std::io::Result<(String, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr: SocketAddr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    Ok((format!("http://{addr}"), handle))
}
