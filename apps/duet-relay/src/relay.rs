use metrics::{counter, gauge};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::protocol::{ConnectionId, NegotiationMessage, RejectReason, RoomId, ServerMessage};
use crate::registry::{ConnectionRegistry, Outbound};
use crate::rooms::{JoinOutcome, LeaveOutcome, Member, RoomSnapshot, RoomTable};

/// Handle returned to the transport for a newly accepted connection.
pub struct Session {
    pub id: ConnectionId,
    /// Fires when the relay drops the connection itself (idle pruning).
    pub evicted: Arc<Notify>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    TargetUnreachable,
}

/// What a disconnect tore down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room: Option<RoomId>,
    pub notified_peer: Option<ConnectionId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStats {
    pub active_rooms: usize,
    pub active_connections: usize,
    pub rooms: Vec<RoomSnapshot>,
}

/// Relay core shared by every connection task.
///
/// Owns the connection registry and the room table; callers only ever see
/// outcomes, never the maps. Whenever both are locked, the connection entry
/// is taken first and the room second.
#[derive(Clone, Default)]
pub struct Relay {
    registry: ConnectionRegistry,
    rooms: RoomTable,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and tell it its own id.
    pub fn connect(&self, outbound: Outbound) -> Session {
        let id = ConnectionId::generate();
        let _ = outbound.send(ServerMessage::Connected(id.clone()));
        let evicted = self.registry.register(id.clone(), outbound);
        counter!("duet_relay_connections_total", 1);
        self.record_gauges();
        debug!(connection_id = %id, "connection registered");
        Session { id, evicted }
    }

    pub fn join(&self, id: &ConnectionId, room_id: RoomId) -> RelayResult<JoinOutcome> {
        let Some(mut entry) = self.registry.entry_mut(id) else {
            warn!(connection_id = %id, room_id = %room_id, "join from unregistered connection");
            return Err(RelayError::UnknownConnection(id.clone()));
        };

        let outcome = match entry.room.clone() {
            Some(current) => JoinOutcome::AlreadyJoined { room: current },
            None => self.rooms.join(
                &room_id,
                Member {
                    id: id.clone(),
                    outbound: entry.outbound.clone(),
                },
            ),
        };

        match &outcome {
            JoinOutcome::FirstArrival | JoinOutcome::Paired { .. } => {
                entry.room = Some(room_id.clone());
            }
            JoinOutcome::RoomFull => {
                let _ = entry.outbound.send(ServerMessage::JoinRejected {
                    room_id: room_id.clone(),
                    reason: RejectReason::RoomFull,
                });
            }
            JoinOutcome::AlreadyJoined { .. } => {
                let _ = entry.outbound.send(ServerMessage::JoinRejected {
                    room_id: room_id.clone(),
                    reason: RejectReason::AlreadyJoined,
                });
            }
        }
        drop(entry);

        counter!("duet_relay_joins_total", 1, "outcome" => outcome.label());
        self.record_gauges();
        match outcome.rejection(&room_id) {
            Some(err) => info!(connection_id = %id, room_id = %room_id, "join rejected: {}", err),
            None => info!(
                connection_id = %id,
                room_id = %room_id,
                outcome = outcome.label(),
                "join accepted"
            ),
        }
        Ok(outcome)
    }

    /// Step out of the current room. Returns the room left, if any.
    pub fn leave(&self, id: &ConnectionId) -> RelayResult<Option<RoomId>> {
        let Some(mut entry) = self.registry.entry_mut(id) else {
            warn!(connection_id = %id, "leave from unregistered connection");
            return Err(RelayError::UnknownConnection(id.clone()));
        };

        let Some(room_id) = entry.room.take() else {
            return Ok(None);
        };
        let outcome = self.rooms.leave(&room_id, id);
        let _ = entry
            .outbound
            .send(ServerMessage::LeftRoom(room_id.clone()));
        drop(entry);

        self.record_gauges();
        info!(
            connection_id = %id,
            room_id = %room_id,
            outcome = ?outcome,
            "left room"
        );
        Ok(Some(room_id))
    }

    /// Forward a negotiation message to its target verbatim.
    ///
    /// A missing target is not an error: the sender is told via
    /// `target-unreachable` and nothing else changes.
    pub fn route(
        &self,
        sender: &ConnectionId,
        message: NegotiationMessage,
    ) -> RelayResult<RouteOutcome> {
        if !self.registry.contains(sender) {
            warn!(connection_id = %sender, "route from unregistered connection");
            return Err(RelayError::UnknownConnection(sender.clone()));
        }

        let kind = message.kind();
        let target = message.target().clone();
        if self.registry.deliver(&target, message.into_delivery()) {
            counter!("duet_relay_messages_routed_total", 1, "kind" => kind.as_str());
            debug!(
                connection_id = %sender,
                target = %target,
                kind = %kind,
                "negotiation message relayed"
            );
            return Ok(RouteOutcome::Delivered);
        }

        counter!("duet_relay_target_unreachable_total", 1, "kind" => kind.as_str());
        debug!(
            connection_id = %sender,
            target = %target,
            kind = %kind,
            "target unreachable"
        );
        self.registry
            .deliver(sender, ServerMessage::TargetUnreachable { target, kind });
        Ok(RouteOutcome::TargetUnreachable)
    }

    /// Record liveness for idle pruning.
    pub fn touch(&self, id: &ConnectionId) -> bool {
        self.registry.touch(id)
    }

    /// Terminal transition for a connection. Safe to call more than once.
    pub fn disconnect(&self, id: &ConnectionId) -> Option<Departure> {
        self.teardown(id).map(|(departure, _)| departure)
    }

    fn teardown(&self, id: &ConnectionId) -> Option<(Departure, Arc<Notify>)> {
        let removed = self.registry.remove(id)?;

        let departure = match removed.room {
            Some(room_id) => {
                let notified_peer = match self.rooms.leave(&room_id, id) {
                    LeaveOutcome::PeerNotified { peer } => Some(peer),
                    LeaveOutcome::Emptied | LeaveOutcome::NotMember => None,
                };
                Departure {
                    room: Some(room_id),
                    notified_peer,
                }
            }
            None => Departure {
                room: None,
                notified_peer: None,
            },
        };

        counter!("duet_relay_disconnects_total", 1);
        self.record_gauges();
        info!(
            connection_id = %id,
            room_id = ?departure.room,
            notified_peer = ?departure.notified_peer,
            connected_for_secs = (chrono::Utc::now() - removed.connected_at).num_seconds(),
            "connection closed"
        );
        Some((departure, removed.evicted))
    }

    /// Disconnect every connection silent for longer than `timeout` and wake
    /// its socket task so the socket gets closed.
    pub fn prune_idle(&self, now: Instant, timeout: Duration) -> usize {
        let mut pruned = 0usize;
        for id in self.registry.idle(now, timeout) {
            if let Some((_, evicted)) = self.teardown(&id) {
                info!(connection_id = %id, "pruned idle connection");
                evicted.notify_one();
                pruned += 1;
            }
        }
        if pruned > 0 {
            counter!("duet_relay_idle_pruned_total", pruned as u64);
        }
        pruned
    }

    pub fn spawn_idle_monitor(&self, interval: Duration, timeout: Duration) -> JoinHandle<()> {
        let relay = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let pruned = relay.prune_idle(Instant::now(), timeout);
                if pruned > 0 {
                    debug!(pruned, "idle sweep finished");
                }
            }
        })
    }

    pub fn room_members(&self, room_id: &RoomId) -> Option<Vec<ConnectionId>> {
        self.rooms.members(room_id)
    }

    pub fn room_of(&self, id: &ConnectionId) -> Option<RoomId> {
        self.registry.room_of(id)
    }

    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.registry.contains(id)
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            active_rooms: self.rooms.len(),
            active_connections: self.registry.len(),
            rooms: self.rooms.snapshot(),
        }
    }

    fn record_gauges(&self) {
        gauge!("duet_relay_active_rooms", self.rooms.len() as f64);
        gauge!("duet_relay_active_connections", self.registry.len() as f64);
    }
}
