//! Mock Infrastructure for Testing the Tenant Gateway
//!
//! ## Components
//!
//! - `TestGateway`: the full router served on an ephemeral local port
//! - `DownstreamMock`: wraps mockito to stand in for a named downstream service
//! - `TokenFactory`: mints bearer tokens signed with the test secret
//! - `unresponsive_downstream`: a listener that accepts and never answers
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{gateway_config, DownstreamMock, TestGateway};
//!
//! let mut messages = DownstreamMock::new().await;
//! messages.mock_json("GET", "/v1/threads", 200, &json!({"threads": []}));
//!
//! let mut config = gateway_config();
//! config.downstream.services.insert("messages".into(), messages.url());
//! let gateway = TestGateway::spawn(config).await?;
//! ```

pub mod downstream;
pub mod gateway;
pub mod tokens;

pub use downstream::{unresponsive_downstream, DownstreamMock};
pub use gateway::{gateway_config, TestGateway};
pub use tokens::{TokenFactory, TEST_ISSUER, TEST_SECRET};
