use thiserror::Error;

use crate::protocol::{ConnectionId, RoomId};

/// Failures surfaced by the relay core.
///
/// None of these are fatal to the process: join rejections go back to the
/// originating connection, and lifecycle faults are logged and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("room {0} already has two participants")]
    RoomFull(RoomId),
    #[error("connection is already in room {0}")]
    AlreadyJoined(RoomId),
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

pub type RelayResult<T> = Result<T, RelayError>;
