//! Room Presence Handlers
//!
//! Read-only view of who is connected to a room right now.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::domain::ChatServiceError;
use crate::shared::error::AppError;
use crate::startup::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPresenceResponse {
    pub room_id: String,
    pub name: String,
    pub members: usize,
    /// Live connections that joined the room, across all devices
    pub connections: usize,
}

/// GET /rooms/{room_id}/presence
pub async fn get_room_presence(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomPresenceResponse>, AppError> {
    let room = state.chat.get_room(&room_id).await.map_err(|e| match e {
        ChatServiceError::RoomNotFound(id) => AppError::NotFound(format!("Room {} not found", id)),
        other => AppError::Internal(other.to_string()),
    })?;

    let connections = state.hub.room_connection_count(&room.id).await;

    Ok(Json(RoomPresenceResponse {
        room_id: room.id,
        name: room.name,
        members: room.member_ids.len(),
        connections,
    }))
}
