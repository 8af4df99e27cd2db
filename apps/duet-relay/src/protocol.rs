use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Relay-assigned identifier for one live socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Caller-chosen room name. Never validated beyond map key identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Mint a fresh room name for clients that want one.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RoomId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Offer or answer envelope. Only `target` is read; `caller`, `sdp` and
/// anything else the client attached stay opaque and are forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdpEnvelope {
    pub target: ConnectionId,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidateEnvelope {
    pub target: ConnectionId,
    pub candidate: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationKind {
    Offer,
    Answer,
    IceCandidate,
}

impl NegotiationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationKind::Offer => "offer",
            NegotiationKind::Answer => "answer",
            NegotiationKind::IceCandidate => "ice-candidate",
        }
    }
}

impl fmt::Display for NegotiationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A negotiation message on its way through the router.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationMessage {
    Offer(SdpEnvelope),
    Answer(SdpEnvelope),
    IceCandidate(IceCandidateEnvelope),
}

impl NegotiationMessage {
    pub fn kind(&self) -> NegotiationKind {
        match self {
            NegotiationMessage::Offer(_) => NegotiationKind::Offer,
            NegotiationMessage::Answer(_) => NegotiationKind::Answer,
            NegotiationMessage::IceCandidate(_) => NegotiationKind::IceCandidate,
        }
    }

    pub fn target(&self) -> &ConnectionId {
        match self {
            NegotiationMessage::Offer(envelope) | NegotiationMessage::Answer(envelope) => {
                &envelope.target
            }
            NegotiationMessage::IceCandidate(envelope) => &envelope.target,
        }
    }

    /// The event the target receives. Candidates lose their envelope.
    pub fn into_delivery(self) -> ServerMessage {
        match self {
            NegotiationMessage::Offer(envelope) => ServerMessage::Offer(envelope),
            NegotiationMessage::Answer(envelope) => ServerMessage::Answer(envelope),
            NegotiationMessage::IceCandidate(envelope) => {
                ServerMessage::IceCandidate(envelope.candidate)
            }
        }
    }
}

/// Events sent from a participant to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinRoom(RoomId),
    LeaveRoom,
    Offer(SdpEnvelope),
    Answer(SdpEnvelope),
    IceCandidate(IceCandidateEnvelope),
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    RoomFull,
    AlreadyJoined,
}

/// Events sent from the relay to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First frame on every socket: the id peers use to address this connection.
    Connected(ConnectionId),
    /// Sent to a joiner that found someone already waiting.
    OtherPeer(ConnectionId),
    /// Sent to the waiting member when a second participant arrives.
    PeerJoined(ConnectionId),
    PeerLeft(ConnectionId),
    Offer(SdpEnvelope),
    Answer(SdpEnvelope),
    IceCandidate(Value),
    JoinRejected {
        room_id: RoomId,
        reason: RejectReason,
    },
    LeftRoom(RoomId),
    TargetUnreachable {
        target: ConnectionId,
        kind: NegotiationKind,
    },
    Pong,
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn parses_join_room_event() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"event": "join-room", "data": "r1"})).unwrap();
        assert_eq!(msg, ClientMessage::JoinRoom(RoomId::from("r1")));
    }

    #[test_timeout::timeout]
    fn parses_unit_events_without_data() {
        let msg: ClientMessage = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
        let msg: ClientMessage = serde_json::from_str(r#"{"event":"leave-room"}"#).unwrap();
        assert_eq!(msg, ClientMessage::LeaveRoom);
    }

    #[test_timeout::timeout]
    fn offer_keeps_unknown_fields() {
        let raw = json!({
            "event": "offer",
            "data": {
                "target": "b",
                "caller": "a",
                "sdp": {"type": "offer", "sdp": "v=0"},
                "renegotiation": true
            }
        });
        let msg: ClientMessage = serde_json::from_value(raw).unwrap();
        let ClientMessage::Offer(envelope) = msg else {
            panic!("expected offer");
        };
        assert_eq!(envelope.body.get("renegotiation"), Some(&json!(true)));

        let delivered = serde_json::to_value(ServerMessage::Offer(envelope)).unwrap();
        assert_eq!(
            delivered,
            json!({
                "event": "offer",
                "data": {
                    "target": "b",
                    "caller": "a",
                    "sdp": {"type": "offer", "sdp": "v=0"},
                    "renegotiation": true
                }
            })
        );
    }

    #[test_timeout::timeout]
    fn answer_without_caller_passes_through() {
        let raw = json!({"event": "answer", "data": {"target": "a", "caller": null, "sdp": "Y"}});
        let msg: ClientMessage = serde_json::from_value(raw.clone()).unwrap();
        let ClientMessage::Answer(envelope) = msg else {
            panic!("expected answer");
        };
        assert_eq!(serde_json::to_value(ServerMessage::Answer(envelope)).unwrap(), raw);

        let raw = json!({"event": "offer", "data": {"target": "b", "sdp": "X"}});
        let msg: ClientMessage = serde_json::from_value(raw.clone()).unwrap();
        let ClientMessage::Offer(envelope) = msg else {
            panic!("expected offer");
        };
        assert!(!envelope.body.contains_key("caller"));
        assert_eq!(serde_json::to_value(ServerMessage::Offer(envelope)).unwrap(), raw);
    }

    #[test_timeout::timeout]
    fn offer_without_target_is_rejected() {
        let raw = json!({"event": "offer", "data": {"caller": "a", "sdp": "X"}});
        assert!(serde_json::from_value::<ClientMessage>(raw).is_err());
    }

    #[test_timeout::timeout]
    fn ice_candidate_delivery_drops_envelope() {
        let message = NegotiationMessage::IceCandidate(IceCandidateEnvelope {
            target: ConnectionId::from("b"),
            candidate: json!({"candidate": "candidate:1 1 udp", "sdpMid": "0"}),
        });
        assert_eq!(message.kind(), NegotiationKind::IceCandidate);
        assert_eq!(message.target().as_str(), "b");

        let wire = serde_json::to_value(message.into_delivery()).unwrap();
        assert_eq!(
            wire,
            json!({
                "event": "ice-candidate",
                "data": {"candidate": "candidate:1 1 udp", "sdpMid": "0"}
            })
        );
    }

    #[test_timeout::timeout]
    fn rejection_serializes_reason_in_kebab_case() {
        let wire = serde_json::to_value(ServerMessage::JoinRejected {
            room_id: RoomId::from("r1"),
            reason: RejectReason::RoomFull,
        })
        .unwrap();
        assert_eq!(
            wire,
            json!({"event": "join-rejected", "data": {"room_id": "r1", "reason": "room-full"}})
        );
    }

    #[test_timeout::timeout]
    fn generated_ids_are_unique_uuids() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
        assert_eq!(RoomId::generate().as_str().len(), 36);
    }
}
