use dashmap::{mapref::entry::Entry, DashMap};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::RelayError;
use crate::protocol::{ConnectionId, RoomId, ServerMessage};
use crate::registry::Outbound;

/// A room never holds more than this many connections.
pub const ROOM_CAPACITY: usize = 2;

/// Room occupant together with the queue used to reach it.
#[derive(Clone)]
pub struct Member {
    pub id: ConnectionId,
    pub outbound: Outbound,
}

struct Room {
    members: Vec<Member>,
}

/// Result of a join attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The room did not exist; the joiner now waits alone.
    FirstArrival,
    /// The joiner was paired with the member already waiting.
    Paired { peer: ConnectionId },
    RoomFull,
    AlreadyJoined { room: RoomId },
}

impl JoinOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JoinOutcome::FirstArrival => "first_arrival",
            JoinOutcome::Paired { .. } => "paired",
            JoinOutcome::RoomFull => "room_full",
            JoinOutcome::AlreadyJoined { .. } => "already_joined",
        }
    }

    /// The domain error behind a rejected join.
    pub fn rejection(&self, room_id: &RoomId) -> Option<RelayError> {
        match self {
            JoinOutcome::RoomFull => Some(RelayError::RoomFull(room_id.clone())),
            JoinOutcome::AlreadyJoined { room } => Some(RelayError::AlreadyJoined(room.clone())),
            JoinOutcome::FirstArrival | JoinOutcome::Paired { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The connection was not a member; nothing changed.
    NotMember,
    /// The connection was the last member and the room is gone.
    Emptied,
    /// The remaining peer has been told about the departure.
    PeerNotified { peer: ConnectionId },
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub members: Vec<ConnectionId>,
}

/// Room id -> ordered members. Each room is mutated under its map entry lock,
/// so joins and leaves on the same room are serialized.
#[derive(Clone, Default)]
pub struct RoomTable {
    rooms: Arc<DashMap<RoomId, Room>>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `member` to `room_id` and send the pairing notifications while
    /// the room is still locked, so a concurrent leave cannot overtake them.
    pub fn join(&self, room_id: &RoomId, member: Member) -> JoinOutcome {
        match self.rooms.entry(room_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(Room {
                    members: vec![member],
                });
                JoinOutcome::FirstArrival
            }
            Entry::Occupied(mut slot) => {
                let room = slot.get_mut();
                if room.members.iter().any(|m| m.id == member.id) {
                    return JoinOutcome::AlreadyJoined {
                        room: room_id.clone(),
                    };
                }
                if room.members.len() >= ROOM_CAPACITY {
                    return JoinOutcome::RoomFull;
                }

                let Some(waiting) = room.members.first().cloned() else {
                    room.members.push(member);
                    return JoinOutcome::FirstArrival;
                };

                let _ = member
                    .outbound
                    .send(ServerMessage::OtherPeer(waiting.id.clone()));
                if waiting
                    .outbound
                    .send(ServerMessage::PeerJoined(member.id.clone()))
                    .is_err()
                {
                    debug!(
                        room_id = %room_id,
                        peer = %waiting.id,
                        "waiting peer's socket already closed; cleanup pending"
                    );
                }
                room.members.push(member);
                JoinOutcome::Paired { peer: waiting.id }
            }
        }
    }

    /// Remove `id` from `room_id`. Idempotent.
    pub fn leave(&self, room_id: &RoomId, id: &ConnectionId) -> LeaveOutcome {
        let Entry::Occupied(mut slot) = self.rooms.entry(room_id.clone()) else {
            return LeaveOutcome::NotMember;
        };

        let room = slot.get_mut();
        let before = room.members.len();
        room.members.retain(|m| &m.id != id);
        if room.members.len() == before {
            return LeaveOutcome::NotMember;
        }

        match room.members.first().cloned() {
            Some(remaining) => {
                let _ = remaining
                    .outbound
                    .send(ServerMessage::PeerLeft(id.clone()));
                LeaveOutcome::PeerNotified { peer: remaining.id }
            }
            None => {
                slot.remove();
                LeaveOutcome::Emptied
            }
        }
    }

    pub fn members(&self, room_id: &RoomId) -> Option<Vec<ConnectionId>> {
        self.rooms
            .get(room_id)
            .map(|room| room.members.iter().map(|m| m.id.clone()).collect())
    }

    pub fn snapshot(&self) -> Vec<RoomSnapshot> {
        let mut rooms: Vec<RoomSnapshot> = self
            .rooms
            .iter()
            .map(|entry| RoomSnapshot {
                room_id: entry.key().clone(),
                members: entry.members.iter().map(|m| m.id.clone()).collect(),
            })
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn member(id: &str) -> (Member, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Member {
                id: ConnectionId::from(id),
                outbound: tx,
            },
            rx,
        )
    }

    #[test_timeout::timeout]
    fn first_arrival_gets_no_notification() {
        let table = RoomTable::new();
        let (a, mut a_rx) = member("a");
        let room = RoomId::from("r1");

        assert_eq!(table.join(&room, a), JoinOutcome::FirstArrival);
        assert!(a_rx.try_recv().is_err());
        assert_eq!(table.members(&room), Some(vec![ConnectionId::from("a")]));
    }

    #[test_timeout::timeout]
    fn second_arrival_pairs_both_sides_once() {
        let table = RoomTable::new();
        let room = RoomId::from("r1");
        let (a, mut a_rx) = member("a");
        let (b, mut b_rx) = member("b");

        table.join(&room, a);
        assert_eq!(
            table.join(&room, b),
            JoinOutcome::Paired {
                peer: ConnectionId::from("a")
            }
        );

        assert_eq!(
            b_rx.try_recv().unwrap(),
            ServerMessage::OtherPeer(ConnectionId::from("a"))
        );
        assert!(b_rx.try_recv().is_err());
        assert_eq!(
            a_rx.try_recv().unwrap(),
            ServerMessage::PeerJoined(ConnectionId::from("b"))
        );
        assert!(a_rx.try_recv().is_err());
    }

    #[test_timeout::timeout]
    fn third_join_is_rejected_without_touching_members() {
        let table = RoomTable::new();
        let room = RoomId::from("r1");
        let (a, _a_rx) = member("a");
        let (b, _b_rx) = member("b");
        let (c, mut c_rx) = member("c");

        table.join(&room, a);
        table.join(&room, b);
        let outcome = table.join(&room, c);
        assert_eq!(outcome, JoinOutcome::RoomFull);
        assert_eq!(outcome.rejection(&room), Some(RelayError::RoomFull(room.clone())));
        assert!(c_rx.try_recv().is_err());
        assert_eq!(
            table.members(&room),
            Some(vec![ConnectionId::from("a"), ConnectionId::from("b")])
        );
    }

    #[test_timeout::timeout]
    fn leave_notifies_remaining_peer_and_removes_empty_room() {
        let table = RoomTable::new();
        let room = RoomId::from("r1");
        let (a, mut a_rx) = member("a");
        let (b, _b_rx) = member("b");
        table.join(&room, a);
        table.join(&room, b);
        let _ = a_rx.try_recv();

        assert_eq!(
            table.leave(&room, &ConnectionId::from("b")),
            LeaveOutcome::PeerNotified {
                peer: ConnectionId::from("a")
            }
        );
        assert_eq!(
            a_rx.try_recv().unwrap(),
            ServerMessage::PeerLeft(ConnectionId::from("b"))
        );

        assert_eq!(
            table.leave(&room, &ConnectionId::from("a")),
            LeaveOutcome::Emptied
        );
        assert!(table.members(&room).is_none());
        assert!(table.is_empty());
    }

    #[test_timeout::timeout]
    fn leave_is_idempotent() {
        let table = RoomTable::new();
        let room = RoomId::from("r1");
        let (a, _a_rx) = member("a");
        table.join(&room, a);

        assert_eq!(
            table.leave(&room, &ConnectionId::from("zzz")),
            LeaveOutcome::NotMember
        );
        assert_eq!(
            table.leave(&RoomId::from("nope"), &ConnectionId::from("a")),
            LeaveOutcome::NotMember
        );
        assert_eq!(table.len(), 1);
    }

    #[test_timeout::timeout]
    fn emptied_room_is_fresh_on_next_join() {
        let table = RoomTable::new();
        let room = RoomId::from("r1");
        let (a, _a_rx) = member("a");
        table.join(&room, a);
        table.leave(&room, &ConnectionId::from("a"));

        let (b, mut b_rx) = member("b");
        assert_eq!(table.join(&room, b), JoinOutcome::FirstArrival);
        assert!(b_rx.try_recv().is_err());
    }

    #[test_timeout::timeout]
    fn concurrent_joins_to_empty_room_pick_one_winner() {
        for _ in 0..50 {
            let table = RoomTable::new();
            let room = RoomId::from("race");
            let handles: Vec<_> = ["a", "b"]
                .into_iter()
                .map(|id| {
                    let table = table.clone();
                    let room = room.clone();
                    std::thread::spawn(move || {
                        let (m, rx) = member(id);
                        (table.join(&room, m), rx)
                    })
                })
                .collect();

            let outcomes: Vec<_> = handles
                .into_iter()
                .map(|h| h.join().unwrap().0)
                .collect();
            let firsts = outcomes
                .iter()
                .filter(|o| **o == JoinOutcome::FirstArrival)
                .count();
            let paired = outcomes
                .iter()
                .filter(|o| matches!(o, JoinOutcome::Paired { .. }))
                .count();
            assert_eq!((firsts, paired), (1, 1));
            assert_eq!(table.members(&room).unwrap().len(), 2);
        }
    }
}
