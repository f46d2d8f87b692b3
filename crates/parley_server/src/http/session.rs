#![forbid(unsafe_code)]

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use parley_domain::{ChatError, Role, User};
use serde::Deserialize;
use sha2::{Digest as _, Sha256};
use tower_sessions::Session;
use tracing::info;

use crate::auth::SESSION_USER_ID_KEY;
use crate::http::ApiError;
use crate::state::AppState;

/// Digest used for credential verification. The hashing scheme itself is a
/// deliberate seam; swap the digest without touching the handlers.
pub fn digest_password(password: &str) -> String {
	let digest = Sha256::digest(password.as_bytes());
	digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}

pub fn verify_password(password: &str, digest: &str) -> bool {
	constant_time_eq(digest_password(password).as_bytes(), digest.as_bytes())
}

#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
	pub username: String,
	pub password: String,
}

fn validate_credentials(body: &CredentialsBody) -> Result<(String, String), ChatError> {
	let username = body.username.trim().to_string();
	if username.is_empty() {
		return Err(ChatError::validation("username must not be empty"));
	}
	if body.password.is_empty() {
		return Err(ChatError::validation("password must not be empty"));
	}
	Ok((username, body.password.clone()))
}

pub async fn register(
	State(state): State<AppState>,
	Json(body): Json<CredentialsBody>,
) -> Result<(StatusCode, Json<User>), ApiError> {
	let (username, password) = validate_credentials(&body)?;

	let user = state
		.store
		.create_user(&username, &digest_password(&password), Role::User)
		.await?;

	info!(user_id = %user.id, "user registered");
	Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
	State(state): State<AppState>,
	session: Session,
	Json(body): Json<CredentialsBody>,
) -> Result<Json<User>, ApiError> {
	let (username, password) = validate_credentials(&body)?;

	let Some(user) = state.store.user_by_username(&username).await? else {
		return Err(ApiError::from(ChatError::Unauthenticated));
	};
	if !verify_password(&password, &user.password_digest) {
		return Err(ApiError::from(ChatError::Unauthenticated));
	}

	session
		.insert(SESSION_USER_ID_KEY, user.id.to_string())
		.await
		.map_err(ChatError::store)?;

	info!(user_id = %user.id, "login");
	Ok(Json(user))
}

pub async fn logout(session: Session) -> Result<StatusCode, ApiError> {
	session.flush().await.map_err(ChatError::store)?;
	Ok(StatusCode::NO_CONTENT)
}
