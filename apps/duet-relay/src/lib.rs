//! Two-party signaling relay.
//!
//! Participants connect over a WebSocket, join a named room that holds at
//! most two of them, and then trade offers, answers and ICE candidates
//! through the relay until they can talk to each other directly. The relay
//! never looks inside those payloads.

pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod rooms;
pub mod server;
pub mod telemetry;
pub mod websocket;

pub use config::Config;
pub use error::{RelayError, RelayResult};
pub use relay::{Relay, RouteOutcome};
pub use rooms::JoinOutcome;
pub use server::{build_router, serve, AppState};
