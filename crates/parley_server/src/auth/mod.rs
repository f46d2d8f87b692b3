#![forbid(unsafe_code)]

pub mod gate;
pub mod tokens;

#[cfg(test)]
mod tokens_tests;

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use parley_domain::{ChatError, Principal, UserId};
use tower_sessions::Session;
use tracing::debug;

use crate::http::ApiError;
use crate::state::AppState;
use crate::store::ChatStore;

/// Session key holding the authenticated user id.
pub const SESSION_USER_ID_KEY: &str = "user_id";

/// Extract a bearer secret from the `Authorization` header or, failing that,
/// from a `token` query parameter (websocket clients cannot always set
/// headers).
pub fn bearer_from_parts(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
	if let Some(value) = headers.get(AUTHORIZATION)
		&& let Ok(value) = value.to_str()
		&& let Some(secret) = value.strip_prefix("Bearer ")
	{
		let secret = secret.trim();
		if !secret.is_empty() {
			return Some(secret.to_string());
		}
	}

	query?
		.split('&')
		.find_map(|pair| pair.strip_prefix("token="))
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(str::to_string)
}

/// Resolve a credential to a `Principal`. A bearer token takes precedence
/// over any session; with neither present the request is unauthenticated.
///
/// Token principals carry the token's permissions verbatim and the owner's
/// role, so a token never grants more than it declares. Session principals
/// read and write everywhere public; only admin sessions delete. Private
/// room access is decided downstream by the gate.
pub async fn resolve_principal(
	store: &ChatStore,
	bearer: Option<&str>,
	session: &Session,
) -> Result<Principal, ChatError> {
	if let Some(secret) = bearer {
		let (token, user) = tokens::validate(store, secret).await?;
		return Ok(Principal::for_token(user.id, user.role, token.permissions));
	}

	let Some(raw) = session
		.get::<String>(SESSION_USER_ID_KEY)
		.await
		.map_err(ChatError::store)?
	else {
		return Err(ChatError::Unauthenticated);
	};

	let user_id: UserId = raw.parse().map_err(|_| ChatError::Unauthenticated)?;
	let Some(user) = store.user_by_id(user_id).await? else {
		debug!(%user_id, "session references unknown user");
		return Err(ChatError::Unauthenticated);
	};

	Ok(Principal::for_session(user.id, user.role))
}

/// Axum extractor wrapping `resolve_principal`, shared by every HTTP route.
pub struct AuthPrincipal(pub Principal);

impl FromRequestParts<AppState> for AuthPrincipal {
	type Rejection = ApiError;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
		let session = Session::from_request_parts(parts, state)
			.await
			.map_err(|(_, msg)| ApiError::from(ChatError::store(msg)))?;

		let bearer = bearer_from_parts(&parts.headers, parts.uri.query());
		match resolve_principal(&state.store, bearer.as_deref(), &session).await {
			Ok(principal) => Ok(Self(principal)),
			Err(e) => {
				metrics::counter!("parley_auth_denied_total").increment(1);
				Err(ApiError::from(e))
			}
		}
	}
}
