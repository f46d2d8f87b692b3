#![forbid(unsafe_code)]

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use parley_domain::{ApiToken, TokenId, TokenKind, TokenPermissions, UserId};
use serde::{Deserialize, Serialize};

use crate::auth::AuthPrincipal;
use crate::auth::tokens::{self, CreateTokenRequest};
use crate::http::ApiError;
use crate::state::AppState;

/// Client-visible token representation. The secret only ever appears masked;
/// `ApiToken` itself is deliberately not serializable.
#[derive(Debug, Serialize)]
pub struct TokenView {
	pub id: TokenId,
	pub owner_user_id: UserId,
	pub kind: TokenKind,
	pub name: String,
	pub secret: String,
	pub permissions: TokenPermissions,
	pub created_at: i64,
	pub expires_at: Option<i64>,
	pub last_used_at: Option<i64>,
	pub revoked: bool,
}

impl From<&ApiToken> for TokenView {
	fn from(token: &ApiToken) -> Self {
		Self {
			id: token.id,
			owner_user_id: token.owner_user_id,
			kind: token.kind,
			name: token.name.clone(),
			secret: token.masked_secret(),
			permissions: token.permissions.clone(),
			created_at: token.created_at,
			expires_at: token.expires_at,
			last_used_at: token.last_used_at,
			revoked: token.revoked,
		}
	}
}

/// Creation response: the masked view plus the full secret, returned exactly
/// once.
#[derive(Debug, Serialize)]
pub struct CreatedTokenView {
	#[serde(flatten)]
	pub view: TokenView,
	pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTokenBody {
	pub name: Option<String>,
	pub revoked: Option<bool>,
}

pub async fn create_token(
	State(state): State<AppState>,
	AuthPrincipal(principal): AuthPrincipal,
	Json(mut body): Json<CreateTokenRequest>,
) -> Result<(StatusCode, Json<CreatedTokenView>), ApiError> {
	// The self-service route always mints for the caller; the privileged
	// variant below is the only path accepting a target user.
	body.owner_user_id = None;

	let minted = tokens::create(&state.store, &principal, body).await?;
	Ok((
		StatusCode::CREATED,
		Json(CreatedTokenView {
			view: TokenView::from(&minted.token),
			token: minted.secret,
		}),
	))
}

/// Privileged variant: accepts `owner_user_id` and any kind, gated by the
/// admin rules in the token service.
pub async fn generate_token(
	State(state): State<AppState>,
	AuthPrincipal(principal): AuthPrincipal,
	Json(body): Json<CreateTokenRequest>,
) -> Result<(StatusCode, Json<CreatedTokenView>), ApiError> {
	let minted = tokens::create(&state.store, &principal, body).await?;
	Ok((
		StatusCode::CREATED,
		Json(CreatedTokenView {
			view: TokenView::from(&minted.token),
			token: minted.secret,
		}),
	))
}

pub async fn list_tokens(
	State(state): State<AppState>,
	AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Vec<TokenView>>, ApiError> {
	let tokens = tokens::list(&state.store, &principal).await?;
	Ok(Json(tokens.iter().map(TokenView::from).collect()))
}

pub async fn get_token(
	State(state): State<AppState>,
	AuthPrincipal(principal): AuthPrincipal,
	Path(id): Path<TokenId>,
) -> Result<Json<TokenView>, ApiError> {
	let token = tokens::get(&state.store, &principal, id).await?;
	Ok(Json(TokenView::from(&token)))
}

pub async fn update_token(
	State(state): State<AppState>,
	AuthPrincipal(principal): AuthPrincipal,
	Path(id): Path<TokenId>,
	Json(body): Json<UpdateTokenBody>,
) -> Result<Json<TokenView>, ApiError> {
	let token = tokens::update(&state.store, &principal, id, body.name, body.revoked).await?;
	Ok(Json(TokenView::from(&token)))
}

pub async fn delete_token(
	State(state): State<AppState>,
	AuthPrincipal(principal): AuthPrincipal,
	Path(id): Path<TokenId>,
) -> Result<StatusCode, ApiError> {
	tokens::delete(&state.store, &principal, id).await?;
	Ok(StatusCode::NO_CONTENT)
}
