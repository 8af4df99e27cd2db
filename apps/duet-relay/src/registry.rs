use chrono::{DateTime, Utc};
use dashmap::{mapref::one::RefMut, DashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};

use crate::protocol::{ConnectionId, RoomId, ServerMessage};

/// Outbound half of a connection. Unbounded so a send never blocks the
/// caller; FIFO per connection.
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

pub(crate) struct ConnectionEntry {
    pub(crate) outbound: Outbound,
    /// Back-reference to the room this connection occupies.
    pub(crate) room: Option<RoomId>,
    last_seen: Instant,
    connected_at: DateTime<Utc>,
    evicted: Arc<Notify>,
}

/// A connection that has been taken out of the registry.
pub struct RemovedConnection {
    pub room: Option<RoomId>,
    pub connected_at: DateTime<Utc>,
    pub evicted: Arc<Notify>,
}

/// Live connections keyed by id. The only owner of the connection -> room
/// back-reference.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection. The returned notifier fires if
    /// the relay evicts the connection on its own initiative.
    pub fn register(&self, id: ConnectionId, outbound: Outbound) -> Arc<Notify> {
        let evicted = Arc::new(Notify::new());
        self.connections.insert(
            id,
            ConnectionEntry {
                outbound,
                room: None,
                last_seen: Instant::now(),
                connected_at: Utc::now(),
                evicted: evicted.clone(),
            },
        );
        evicted
    }

    /// Exclusive access to one connection's entry.
    ///
    /// Lock order: a caller holding this guard may go on to lock a room, never
    /// the other way round.
    pub(crate) fn entry_mut(
        &self,
        id: &ConnectionId,
    ) -> Option<RefMut<'_, ConnectionId, ConnectionEntry>> {
        self.connections.get_mut(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn room_of(&self, id: &ConnectionId) -> Option<RoomId> {
        self.connections
            .get(id)
            .and_then(|entry| entry.room.clone())
    }

    /// Record activity on a connection. Returns false for unknown ids.
    pub fn touch(&self, id: &ConnectionId) -> bool {
        match self.connections.get_mut(id) {
            Some(mut entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Push a message onto a connection's outbound queue. False when the
    /// connection is gone or its socket writer has already shut down.
    pub fn deliver(&self, id: &ConnectionId, message: ServerMessage) -> bool {
        match self.connections.get(id) {
            Some(entry) => entry.outbound.send(message).is_ok(),
            None => false,
        }
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<RemovedConnection> {
        self.connections.remove(id).map(|(_, entry)| RemovedConnection {
            room: entry.room,
            connected_at: entry.connected_at,
            evicted: entry.evicted,
        })
    }

    /// Connections that have been silent for longer than `timeout`.
    pub fn idle(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.last_seen) > timeout)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
