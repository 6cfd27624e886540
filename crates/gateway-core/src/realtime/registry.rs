use super::RealtimeMessage;
use crate::context::CorrelationId;
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::Instant,
};
use uuid::Uuid;

/// Identifier of one registered realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Ping,
    Close,
}

/// Handed back by [`ConnectionRegistry::register`]. The socket's writer task drains
/// `outbound`; when the registry drops its sender the stream ends and the socket closes.
#[derive(Debug)]
pub struct Registration {
    pub id: ConnectionId,
    pub outbound: mpsc::Receiver<OutboundFrame>,
}

struct Connection {
    tenant_id: String,
    correlation_id: CorrelationId,
    sender: mpsc::Sender<OutboundFrame>,
    alive: AtomicBool,
    last_pong_at: Mutex<Instant>,
}

#[derive(Default)]
struct Index {
    connections: HashMap<ConnectionId, Connection>,
    by_tenant: HashMap<String, HashSet<ConnectionId>>,
}

impl Index {
    fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        if let Some(ids) = self.by_tenant.get_mut(&connection.tenant_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_tenant.remove(&connection.tenant_id);
            }
        }
        Some(connection)
    }
}

/// Outcome of one heartbeat sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: usize,
}

/// Owner of every live realtime connection in the process.
///
/// Connections are indexed by id and by tenant. Registration, removal and the
/// heartbeat sweep take the write lock; broadcasts, pongs and stats share the read
/// lock, so a broadcast never sees a half-inserted connection.
///
/// The registry never touches sockets. Each connection is a bounded channel drained
/// by its writer task, and delivery is a non-blocking `try_send`: a full or closed
/// channel counts as a failed delivery rather than stalling the caller.
///
/// Once [`drain`](Self::drain) has run the registry stays closed: later registrations
/// receive an immediate `Close` and are never indexed.
pub struct ConnectionRegistry {
    index: RwLock<Index>,
    outbound_buffer: usize,
    draining: AtomicBool,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            outbound_buffer: outbound_buffer.max(1),
            draining: AtomicBool::new(false),
        }
    }

    /// Adds a connection. After a drain the connection is closed at once instead.
    pub fn register(&self, tenant_id: &str, correlation_id: CorrelationId) -> Registration {
        let (sender, outbound) = mpsc::channel(self.outbound_buffer);
        let id = ConnectionId::generate();

        let connection = Connection {
            tenant_id: tenant_id.to_string(),
            correlation_id,
            sender,
            alive: AtomicBool::new(true),
            last_pong_at: Mutex::new(Instant::now()),
        };

        {
            let mut index = self.index.write();
            if self.draining.load(Ordering::Acquire) {
                drop(index);
                let _ = connection.sender.try_send(OutboundFrame::Close);
                tracing::info!(connection_id = %id, tenant_id, "realtime registry draining, connection closed");
                return Registration { id, outbound };
            }
            index.by_tenant.entry(tenant_id.to_string()).or_default().insert(id);
            index.connections.insert(id, connection);
        }

        tracing::info!(connection_id = %id, tenant_id, "realtime connection registered");
        Registration { id, outbound }
    }

    /// Removes a connection. Returns `false` if it was already gone.
    pub fn deregister(&self, id: ConnectionId) -> bool {
        let removed = self.index.write().remove(id);
        match removed {
            Some(connection) => {
                tracing::info!(
                    connection_id = %id,
                    tenant_id = %connection.tenant_id,
                    correlation_id = %connection.correlation_id,
                    "realtime connection deregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Marks a connection alive after a liveness response.
    pub fn record_pong(&self, id: ConnectionId) -> bool {
        let index = self.index.read();
        let Some(connection) = index.connections.get(&id) else {
            return false;
        };
        connection.alive.store(true, Ordering::Release);
        *connection.last_pong_at.lock() = Instant::now();
        true
    }

    /// Sends `message` to every connection of `tenant_id`. Returns successful deliveries.
    pub fn broadcast_to_tenant(&self, tenant_id: &str, message: &RealtimeMessage) -> usize {
        let Some(frame) = encode(message) else {
            return 0;
        };

        let index = self.index.read();
        let Some(ids) = index.by_tenant.get(tenant_id) else {
            return 0;
        };

        ids.iter()
            .filter_map(|id| index.connections.get(id).map(|connection| (id, connection)))
            .filter(|(id, connection)| deliver(**id, connection, OutboundFrame::Text(frame.clone())))
            .count()
    }

    /// Sends `message` to every connection. Returns successful deliveries.
    pub fn broadcast_to_all(&self, message: &RealtimeMessage) -> usize {
        let Some(frame) = encode(message) else {
            return 0;
        };

        self.index
            .read()
            .connections
            .iter()
            .filter(|(id, connection)| deliver(**id, connection, OutboundFrame::Text(frame.clone())))
            .count()
    }

    /// Sends `message` to one connection.
    pub fn send_to(&self, id: ConnectionId, message: &RealtimeMessage) -> bool {
        let Some(frame) = encode(message) else {
            return false;
        };
        let index = self.index.read();
        index.connections.get(&id).is_some_and(|connection| deliver(id, connection, OutboundFrame::Text(frame)))
    }

    /// One heartbeat tick.
    ///
    /// A connection still marked not-alive from the previous tick is closed and
    /// removed. Every other connection is marked not-alive and probed; a pong before
    /// the next tick restores it.
    pub fn sweep(&self) -> SweepReport {
        let mut index = self.index.write();

        let dead: Vec<ConnectionId> = index
            .connections
            .iter()
            .filter(|(_, connection)| !connection.alive.load(Ordering::Acquire))
            .map(|(id, _)| *id)
            .collect();

        for id in &dead {
            if let Some(connection) = index.remove(*id) {
                let _ = connection.sender.try_send(OutboundFrame::Close);
                tracing::info!(
                    connection_id = %id,
                    tenant_id = %connection.tenant_id,
                    last_pong_ms_ago = u64::try_from(connection.last_pong_at.lock().elapsed().as_millis()).unwrap_or(u64::MAX),
                    "evicting unresponsive realtime connection"
                );
            }
        }

        let mut probed = 0;
        for (id, connection) in &index.connections {
            connection.alive.store(false, Ordering::Release);
            if deliver(*id, connection, OutboundFrame::Ping) {
                probed += 1;
            }
        }

        SweepReport { probed, evicted: dead.len() }
    }

    /// Closes and removes every connection and refuses new ones. Returns how many
    /// were removed.
    pub fn drain(&self) -> usize {
        let drained = {
            let mut index = self.index.write();
            self.draining.store(true, Ordering::Release);
            std::mem::take(&mut *index)
        };

        for connection in drained.connections.values() {
            let _ = connection.sender.try_send(OutboundFrame::Close);
        }

        let count = drained.connections.len();
        tracing::info!(count, "realtime registry drained");
        count
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.index.read().connections.len()
    }

    #[must_use]
    pub fn tenant_connection_count(&self, tenant_id: &str) -> usize {
        self.index.read().by_tenant.get(tenant_id).map_or(0, HashSet::len)
    }

    #[must_use]
    pub fn tenant_count(&self) -> usize {
        self.index.read().by_tenant.len()
    }

    #[must_use]
    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.index.read().connections.contains_key(&id)
    }

    #[must_use]
    pub fn last_pong_at(&self, id: ConnectionId) -> Option<Instant> {
        self.index.read().connections.get(&id).map(|connection| *connection.last_pong_at.lock())
    }
}

fn encode(message: &RealtimeMessage) -> Option<String> {
    serde_json::to_string(message)
        .map_err(|e| tracing::error!(error = %e, "failed to encode realtime message"))
        .ok()
}

fn deliver(id: ConnectionId, connection: &Connection, frame: OutboundFrame) -> bool {
    match connection.sender.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(
                connection_id = %id,
                tenant_id = %connection.tenant_id,
                "realtime outbound buffer full, frame dropped"
            );
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(connection_id = %id, tenant_id = %connection.tenant_id, "realtime connection already closed");
            false
        }
    }
}
