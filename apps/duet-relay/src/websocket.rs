use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Interval;
use tracing::{debug, error, info, warn};

use crate::error::RelayError;
use crate::protocol::{ClientMessage, ConnectionId, NegotiationMessage, ServerMessage};
use crate::relay::Relay;
use crate::server::AppState;

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state.relay, state.heartbeat_interval, remote_addr)
    })
}

async fn handle_socket(
    socket: WebSocket,
    relay: Relay,
    heartbeat_interval: Option<Duration>,
    remote_addr: SocketAddr,
) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let session = relay.connect(tx.clone());
    let connection_id = session.id.clone();

    // Writer: drains this connection's queue in order until every sender is
    // gone, and pings the client so a quiet but healthy socket stays alive.
    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        let mut heartbeat = heartbeat_interval.map(|period| {
            tokio::time::interval_at(tokio::time::Instant::now() + period, period)
        });
        loop {
            let msg = tokio::select! {
                msg = rx.recv() => msg,
                _ = next_heartbeat(&mut heartbeat) => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        debug!(connection_id = %writer_id, "ping failed; stopping writer");
                        break;
                    }
                    continue;
                }
            };
            let Some(msg) = msg else {
                break;
            };
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!(connection_id = %writer_id, "failed to encode outbound event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                debug!(connection_id = %writer_id, "socket write failed; stopping writer");
                break;
            }
        }
        let _ = sender.close().await;
        debug!(connection_id = %writer_id, "writer task ended");
    });

    info!(connection_id = %connection_id, remote_addr = %remote_addr, "websocket connected");

    loop {
        let frame = tokio::select! {
            _ = session.evicted.notified() => {
                info!(connection_id = %connection_id, "closing evicted connection");
                break;
            }
            frame = receiver.next() => frame,
        };

        let msg = match frame {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                warn!(connection_id = %connection_id, "websocket error: {}", e);
                break;
            }
            None => break,
        };

        match msg {
            Message::Text(text) => handle_frame(&relay, &connection_id, &tx, &text),
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => handle_frame(&relay, &connection_id, &tx, &text),
                Err(_) => {
                    debug!(connection_id = %connection_id, "ignoring non-UTF8 binary frame");
                }
            },
            Message::Close(_) => {
                debug!(connection_id = %connection_id, "received close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                relay.touch(&connection_id);
            }
        }
    }

    relay.disconnect(&connection_id);
    drop(tx);
    let _ = writer.await;

    info!(connection_id = %connection_id, "websocket disconnected");
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn handle_frame(
    relay: &Relay,
    connection_id: &ConnectionId,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    text: &str,
) {
    relay.touch(connection_id);
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => {
            if let Err(e) = dispatch(relay, connection_id, tx, message) {
                error!(connection_id = %connection_id, "lifecycle fault: {}", e);
                let _ = tx.send(ServerMessage::Error {
                    message: e.to_string(),
                });
            }
        }
        Err(e) => {
            warn!(connection_id = %connection_id, "failed to parse client message: {}", e);
            let _ = tx.send(ServerMessage::Error {
                message: format!("invalid message format: {}", e),
            });
        }
    }
}

/// Apply one inbound event. Rejections and unreachable targets are reported
/// to the sender by the relay itself; only lifecycle faults come back here.
pub fn dispatch(
    relay: &Relay,
    connection_id: &ConnectionId,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    message: ClientMessage,
) -> Result<(), RelayError> {
    match message {
        ClientMessage::JoinRoom(room_id) => {
            relay.join(connection_id, room_id)?;
        }
        ClientMessage::LeaveRoom => {
            relay.leave(connection_id)?;
        }
        ClientMessage::Offer(envelope) => {
            relay.route(connection_id, NegotiationMessage::Offer(envelope))?;
        }
        ClientMessage::Answer(envelope) => {
            relay.route(connection_id, NegotiationMessage::Answer(envelope))?;
        }
        ClientMessage::IceCandidate(envelope) => {
            relay.route(connection_id, NegotiationMessage::IceCandidate(envelope))?;
        }
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
    }
    Ok(())
}
