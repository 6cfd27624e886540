//! Realtime connection registry and heartbeat.
//!
//! The registry is constructed once by the runtime and shared by `Arc` with whatever
//! needs to register sockets or broadcast. Liveness uses a two-tick scheme: each tick
//! probes every connection and evicts any that did not answer the previous probe, so
//! a dead peer lingers for at most about two heartbeat intervals.

pub mod heartbeat;
pub mod registry;

pub use heartbeat::HeartbeatHandle;
pub use registry::{ConnectionId, ConnectionRegistry, OutboundFrame, Registration, SweepReport};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire envelope for every realtime payload: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl RealtimeMessage {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self { kind: kind.into(), data }
    }
}
