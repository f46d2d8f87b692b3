#![forbid(unsafe_code)]

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use parley_domain::{Action, AuthMode, ChatError, Message, Room, RoomId};
use serde::Deserialize;
use tracing::info;

use crate::auth::AuthPrincipal;
use crate::auth::gate;
use crate::http::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RoomBody {
	pub name: String,

	#[serde(default)]
	pub description: String,

	#[serde(default)]
	pub is_private: bool,
}

#[derive(Debug, Deserialize)]
pub struct MessageBody {
	pub content: String,
}

async fn load_room(state: &AppState, id: RoomId) -> Result<Room, ChatError> {
	state.store.room_by_id(id).await?.ok_or(ChatError::NotFound("room"))
}

pub async fn list_rooms(
	State(state): State<AppState>,
	AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Vec<Room>>, ApiError> {
	gate::authorize(&state.store, &principal, Action::Read, None).await?;
	Ok(Json(state.store.rooms_visible_to(principal.user_id).await?))
}

pub async fn create_room(
	State(state): State<AppState>,
	AuthPrincipal(principal): AuthPrincipal,
	Json(body): Json<RoomBody>,
) -> Result<(StatusCode, Json<Room>), ApiError> {
	gate::authorize(&state.store, &principal, Action::Write, None).await?;

	let name = body.name.trim();
	if name.is_empty() {
		return Err(ApiError::from(ChatError::validation("room name must not be empty")));
	}

	let room = state
		.store
		.create_room(name, body.description.trim(), body.is_private, principal.user_id)
		.await?;

	info!(room_id = %room.id, created_by = %principal.user_id, "room created");
	Ok((StatusCode::CREATED, Json(room)))
}

pub async fn get_room(
	State(state): State<AppState>,
	AuthPrincipal(principal): AuthPrincipal,
	Path(id): Path<RoomId>,
) -> Result<Json<Room>, ApiError> {
	let room = load_room(&state, id).await?;
	gate::authorize(&state.store, &principal, Action::Read, Some(&room)).await?;
	Ok(Json(room))
}

pub async fn update_room(
	State(state): State<AppState>,
	AuthPrincipal(principal): AuthPrincipal,
	Path(id): Path<RoomId>,
	Json(body): Json<RoomBody>,
) -> Result<Json<Room>, ApiError> {
	let room = load_room(&state, id).await?;

	let name = body.name.trim();
	if name.is_empty() {
		return Err(ApiError::from(ChatError::validation("room name must not be empty")));
	}

	gate::authorize(&state.store, &principal, Action::Write, Some(&room)).await?;
	gate::authorize_room_admin(&state.store, &principal, &room).await?;

	let updated = state
		.store
		.update_room(id, name, body.description.trim(), body.is_private)
		.await?
		.ok_or(ChatError::NotFound("room"))?;

	info!(room_id = %id, "room updated");
	Ok(Json(updated))
}

pub async fn delete_room(
	State(state): State<AppState>,
	AuthPrincipal(principal): AuthPrincipal,
	Path(id): Path<RoomId>,
) -> Result<StatusCode, ApiError> {
	let room = load_room(&state, id).await?;

	// Session principals only carry `delete` when the user is a server admin,
	// yet a plain user must be able to delete a room they created. Room
	// deletion is governed by the room-admin rule; token principals still
	// need their declared delete permission.
	if principal.auth_mode == AuthMode::Token {
		gate::authorize(&state.store, &principal, Action::Delete, Some(&room)).await?;
	}
	gate::authorize_room_admin(&state.store, &principal, &room).await?;

	if !state.store.delete_room(id).await? {
		return Err(ApiError::from(ChatError::NotFound("room")));
	}

	info!(room_id = %id, "room deleted");
	Ok(StatusCode::NO_CONTENT)
}

pub async fn list_messages(
	State(state): State<AppState>,
	AuthPrincipal(principal): AuthPrincipal,
	Path(id): Path<RoomId>,
) -> Result<Json<Vec<Message>>, ApiError> {
	let room = load_room(&state, id).await?;
	gate::authorize(&state.store, &principal, Action::Read, Some(&room)).await?;
	Ok(Json(state.store.recent_messages(id, state.gateway.history_limit).await?))
}

/// Persist a message through the room hub so connected gateway clients see
/// API-created messages in commit order too.
pub async fn post_message(
	State(state): State<AppState>,
	AuthPrincipal(principal): AuthPrincipal,
	Path(id): Path<RoomId>,
	Json(body): Json<MessageBody>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
	let room = load_room(&state, id).await?;
	gate::authorize(&state.store, &principal, Action::Write, Some(&room)).await?;

	let content = body.content.trim();
	if content.is_empty() {
		return Err(ApiError::from(ChatError::validation("message content must not be empty")));
	}

	let message = state.hub.send_message(&state.store, id, principal.user_id, content).await?;
	Ok((StatusCode::CREATED, Json(message)))
}
