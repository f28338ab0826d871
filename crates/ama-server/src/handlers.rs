//! HTTP handlers: room/message CRUD plus the subscription upgrade.
//!
//! Mutations write through the store first, build their response, and only
//! then hand the resulting event to the notifier on a detached task.

use std::time::Instant;

use ama_core::{MessageId, RoomEvent, RoomId};
use ama_store::{MessageRow, RoomRow, RoomStore};
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::server::AppState;
use crate::session::{self, SubscriptionSession};

#[derive(Debug, Deserialize)]
pub struct CreateRoomBody {
    pub theme: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageBody {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdResponse {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomResponse {
    pub id: String,
    pub theme: String,
}

impl From<RoomRow> for RoomResponse {
    fn from(row: RoomRow) -> Self {
        Self {
            id: row.id.to_string(),
            theme: row.theme,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: String,
    pub room_id: String,
    pub message: String,
    pub reaction_count: i64,
    pub answered: bool,
}

impl From<MessageRow> for MessageResponse {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id.to_string(),
            room_id: row.room_id.to_string(),
            message: row.message,
            reaction_count: row.reaction_count,
            answered: row.answered,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReactionResponse {
    pub reaction_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub connections: usize,
}

fn parse_room_id(raw: &str) -> Result<RoomId, ApiError> {
    RoomId::parse(raw).map_err(|_| ApiError::InvalidRoomId)
}

fn parse_message_id(raw: &str) -> Result<MessageId, ApiError> {
    MessageId::parse(raw).map_err(|_| ApiError::InvalidMessageId)
}

fn require_room(store: &dyn RoomStore, id: &RoomId) -> Result<RoomRow, ApiError> {
    match store.get_room(id) {
        Ok(room) => Ok(room),
        Err(e) if e.is_not_found() => Err(ApiError::RoomNotFound),
        Err(e) => Err(ApiError::persistence("get_room")(e)),
    }
}

/// The room must exist and the message must belong to it.
fn require_message_in_room(
    store: &dyn RoomStore,
    room_id: &RoomId,
    message_id: &MessageId,
) -> Result<MessageRow, ApiError> {
    require_room(store, room_id)?;
    let message = match store.get_message(message_id) {
        Ok(message) => message,
        Err(e) if e.is_not_found() => return Err(ApiError::MessageNotFound),
        Err(e) => return Err(ApiError::persistence("get_message")(e)),
    };
    if message.room_id != *room_id {
        return Err(ApiError::MessageNotInRoom);
    }
    Ok(message)
}

/// GET /subscribe/{room_id}
///
/// The room is validated before the upgrade is attempted, so a bad or
/// unknown id never gets a socket.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(raw_room_id): Path<String>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let room_id = parse_room_id(&raw_room_id)?;
    require_room(state.store.as_ref(), &room_id)?;

    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(room_id = %room_id, error = %rejection.body_text(), "failed to upgrade to websocket");
            return Err(ApiError::UpgradeFailed(rejection.body_text()));
        }
    };

    let session = SubscriptionSession::new(room_id, state.registry.clone(), &state.shutdown);
    info!(room_id = %room_id, connection_id = %session.connection_id(), "new client connecting");

    Ok(ws
        .on_failed_upgrade(move |e| {
            warn!(room_id = %room_id, error = %e, "websocket handshake failed");
        })
        .on_upgrade(move |socket| session::serve_socket(socket, session)))
}

/// POST /api/rooms
pub async fn create_room(
    State(state): State<AppState>,
    body: Result<Json<CreateRoomBody>, JsonRejection>,
) -> Result<Json<IdResponse>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::InvalidBody(e.body_text()))?;
    let id = state
        .store
        .insert_room(&body.theme)
        .map_err(ApiError::persistence("insert_room"))?;
    info!(room_id = %id, "room created");
    Ok(Json(IdResponse { id: id.to_string() }))
}

/// GET /api/rooms
pub async fn list_rooms(State(state): State<AppState>) -> Result<Json<Vec<RoomResponse>>, ApiError> {
    let rooms = state
        .store
        .list_rooms()
        .map_err(ApiError::persistence("list_rooms"))?;
    Ok(Json(rooms.into_iter().map(RoomResponse::from).collect()))
}

/// POST /api/rooms/{room_id}/messages
pub async fn create_message(
    State(state): State<AppState>,
    Path(raw_room_id): Path<String>,
    body: Result<Json<CreateMessageBody>, JsonRejection>,
) -> Result<Json<IdResponse>, ApiError> {
    let room_id = parse_room_id(&raw_room_id)?;
    let Json(body) = body.map_err(|e| ApiError::InvalidBody(e.body_text()))?;
    require_room(state.store.as_ref(), &room_id)?;

    let message_id = state
        .store
        .insert_message(&room_id, &body.message)
        .map_err(ApiError::persistence("insert_message"))?;

    let response = Json(IdResponse {
        id: message_id.to_string(),
    });
    state
        .notifier
        .dispatch(RoomEvent::message_created(room_id, message_id, body.message));
    Ok(response)
}

/// GET /api/rooms/{room_id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Path(raw_room_id): Path<String>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let room_id = parse_room_id(&raw_room_id)?;
    require_room(state.store.as_ref(), &room_id)?;
    let messages = state
        .store
        .list_room_messages(&room_id)
        .map_err(ApiError::persistence("list_room_messages"))?;
    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}

/// GET /api/rooms/{room_id}/messages/{message_id}
pub async fn get_message(
    State(state): State<AppState>,
    Path((raw_room_id, raw_message_id)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let room_id = parse_room_id(&raw_room_id)?;
    let message_id = parse_message_id(&raw_message_id)?;
    let message = require_message_in_room(state.store.as_ref(), &room_id, &message_id)?;
    Ok(Json(message.into()))
}

/// PATCH /api/rooms/{room_id}/messages/{message_id}/react
pub async fn react_to_message(
    State(state): State<AppState>,
    Path((raw_room_id, raw_message_id)): Path<(String, String)>,
) -> Result<Json<ReactionResponse>, ApiError> {
    let room_id = parse_room_id(&raw_room_id)?;
    let message_id = parse_message_id(&raw_message_id)?;
    require_message_in_room(state.store.as_ref(), &room_id, &message_id)?;

    let count = state
        .store
        .react_to_message(&message_id)
        .map_err(count_update_error("react_to_message"))?;

    let response = Json(ReactionResponse { reaction_count: count });
    state
        .notifier
        .dispatch(RoomEvent::reaction_increased(room_id, message_id, count));
    Ok(response)
}

/// DELETE /api/rooms/{room_id}/messages/{message_id}/react
pub async fn remove_reaction_from_message(
    State(state): State<AppState>,
    Path((raw_room_id, raw_message_id)): Path<(String, String)>,
) -> Result<Json<ReactionResponse>, ApiError> {
    let room_id = parse_room_id(&raw_room_id)?;
    let message_id = parse_message_id(&raw_message_id)?;
    require_message_in_room(state.store.as_ref(), &room_id, &message_id)?;

    let count = state
        .store
        .remove_reaction_from_message(&message_id)
        .map_err(count_update_error("remove_reaction_from_message"))?;

    let response = Json(ReactionResponse { reaction_count: count });
    state
        .notifier
        .dispatch(RoomEvent::reaction_decreased(room_id, message_id, count));
    Ok(response)
}

/// PATCH /api/rooms/{room_id}/messages/{message_id}/answer
///
/// No event is broadcast for this change.
pub async fn mark_message_as_answered(
    State(state): State<AppState>,
    Path((raw_room_id, raw_message_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let room_id = parse_room_id(&raw_room_id)?;
    let message_id = parse_message_id(&raw_message_id)?;
    require_message_in_room(state.store.as_ref(), &room_id, &message_id)?;

    state
        .store
        .mark_message_as_answered(&message_id)
        .map_err(count_update_error("mark_message_as_answered"))?;
    Ok(StatusCode::NO_CONTENT)
}

/// A message that vanished between the lookup and the update is a 404, not an outage.
fn count_update_error(op: &'static str) -> impl FnOnce(ama_store::StoreError) -> ApiError {
    move |e| {
        if e.is_not_found() {
            ApiError::MessageNotFound
        } else {
            ApiError::persistence(op)(e)
        }
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".into(),
        uptime_secs: Instant::now().duration_since(state.start_time).as_secs(),
        connections: state.registry.connection_count(),
    })
}
