use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::protocol::RoomId;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    pub room_id: RoomId,
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn relay_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.relay.stats())
}

/// Hand out a fresh room name. The room itself only exists once someone joins.
pub async fn create_room() -> impl IntoResponse {
    (
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            room_id: RoomId::generate(),
        }),
    )
}

pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
