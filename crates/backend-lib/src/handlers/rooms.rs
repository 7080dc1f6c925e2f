// ============================
// crates/backend-lib/src/handlers/rooms.rs
// ============================
//! Room HTTP API: creation, metadata, history and live presence.
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use chatroom_common::{
    CreateRoomRequest, CreateRoomResponse, HistoryResponse, PresenceResponse, Room, RoomResponse,
};
use tracing::info;

use crate::error::ChatError;
use crate::metrics::ROOM_CREATED;
use crate::validation::{validate_room_id, validate_room_name};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/rooms/create", post(create_room))
        .route("/api/rooms/{room_id}", get(get_room))
        .route("/api/rooms/{room_id}/messages", get(get_messages))
        .route("/api/rooms/{room_id}/presence", get(get_presence))
}

/// Ids that could never have been generated are answered like missing rooms
fn checked_room_id(room_id: &str) -> Result<&str, ChatError> {
    validate_room_id(room_id).map_err(|_| ChatError::RoomNotFound(room_id.to_string()))
}

pub async fn create_room(
    State(state): State<AppState>,
    body: Result<Json<CreateRoomRequest>, JsonRejection>,
) -> Result<Json<CreateRoomResponse>, ChatError> {
    let Json(request) = body?;
    let room_name = validate_room_name(&request.room_name)?;
    let room = state.store.create_room(Room::new(room_name)).await?;

    ::metrics::counter!(ROOM_CREATED).increment(1);
    info!(room_id = %room.room_id, room_name = %room.room_name, "room created");

    Ok(Json(CreateRoomResponse {
        success: true,
        link: state.settings.room_link(&room.room_id),
        room_id: room.room_id,
        room_name: room.room_name,
    }))
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomResponse>, ChatError> {
    let room = state.store.find_room(checked_room_id(&room_id)?).await?;
    Ok(Json(RoomResponse {
        success: true,
        room,
    }))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<HistoryResponse>, ChatError> {
    let messages = state
        .store
        .list_messages(checked_room_id(&room_id)?, state.settings.history_limit)
        .await?;
    Ok(Json(HistoryResponse {
        success: true,
        messages,
    }))
}

pub async fn get_presence(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<PresenceResponse>, ChatError> {
    let room = state.store.find_room(checked_room_id(&room_id)?).await?;
    let members = state.coordinator.members(&room.room_id).await?;
    Ok(Json(PresenceResponse {
        success: true,
        room_id: room.room_id,
        members,
        active_users: room.active_users,
    }))
}
