#![forbid(unsafe_code)]

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parley_domain::{ApiToken, ChatError, Principal, SecretString, TokenId, TokenKind, TokenPermissions, User, UserId};
use rand::RngCore as _;
use serde::Deserialize;
use tracing::{info, warn};

use crate::store::ChatStore;
use crate::util::time::unix_ms_now;

/// Number of random bytes in a token secret (256 bits of entropy).
const SECRET_BYTES: usize = 32;

/// Request to mint a new token.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTokenRequest {
	pub name: String,

	#[serde(default = "default_kind")]
	pub kind: TokenKind,

	#[serde(default)]
	pub permissions: TokenPermissions,

	pub expires_at: Option<i64>,

	/// Mint for another user. Admin only.
	#[serde(default)]
	pub owner_user_id: Option<UserId>,
}

fn default_kind() -> TokenKind {
	TokenKind::User
}

/// A freshly minted token. `secret` is returned to the caller exactly once;
/// every later read shows only the masked form.
#[derive(Debug)]
pub struct NewToken {
	pub token: ApiToken,
	pub secret: String,
}

fn generate_secret() -> String {
	let mut bytes = [0u8; SECRET_BYTES];
	rand::rng().fill_bytes(&mut bytes);
	URL_SAFE_NO_PAD.encode(bytes)
}

fn can_manage(caller: &Principal, token: &ApiToken) -> bool {
	caller.is_admin() || token.owner_user_id == caller.user_id
}

/// Mint a token. Non-admin callers may only mint for themselves; the kind is
/// unrestricted for self-service tokens.
pub async fn create(store: &ChatStore, caller: &Principal, req: CreateTokenRequest) -> Result<NewToken, ChatError> {
	let owner = req.owner_user_id.unwrap_or(caller.user_id);
	if owner != caller.user_id && !caller.is_admin() {
		return Err(ChatError::forbidden("only admins may create tokens for other users"));
	}

	let name = req.name.trim();
	if name.is_empty() {
		return Err(ChatError::validation("token name must not be empty"));
	}

	let now = unix_ms_now();
	if let Some(expires_at) = req.expires_at
		&& expires_at <= now
	{
		return Err(ChatError::validation("expires_at must be in the future"));
	}

	if store.user_by_id(owner).await?.is_none() {
		return Err(ChatError::NotFound("user"));
	}

	let token = ApiToken {
		id: TokenId::new_v4(),
		secret: SecretString::new(generate_secret()),
		owner_user_id: owner,
		kind: req.kind,
		name: name.to_string(),
		permissions: req.permissions,
		created_at: now,
		expires_at: req.expires_at,
		last_used_at: None,
		revoked: false,
	};

	let secret = token.secret.expose().to_string();
	store.insert_token(&token).await?;

	info!(token_id = %token.id, owner = %owner, kind = token.kind.as_str(), "token created");
	Ok(NewToken { token, secret })
}

/// Validate a bearer secret. Unknown secrets, revoked tokens and expired
/// tokens are each rejected distinctly; only a successful validation touches
/// `last_used_at`, and that update is best effort.
pub async fn validate(store: &ChatStore, secret: &str) -> Result<(ApiToken, User), ChatError> {
	let Some(token) = store.token_by_secret(secret).await? else {
		return Err(ChatError::Unauthenticated);
	};

	if token.revoked {
		return Err(ChatError::Revoked);
	}
	if token.is_expired(unix_ms_now()) {
		return Err(ChatError::Expired);
	}

	let Some(user) = store.user_by_id(token.owner_user_id).await? else {
		warn!(token_id = %token.id, "token owner no longer exists");
		return Err(ChatError::Unauthenticated);
	};

	if let Err(e) = store.touch_token_last_used(token.id, unix_ms_now()).await {
		warn!(token_id = %token.id, error = %e, "failed to update token last_used_at");
	}

	Ok((token, user))
}

/// Tokens visible to the caller: their own, or all of them for admins.
pub async fn list(store: &ChatStore, caller: &Principal) -> Result<Vec<ApiToken>, ChatError> {
	if caller.is_admin() {
		store.all_tokens().await
	} else {
		store.tokens_for_owner(caller.user_id).await
	}
}

pub async fn get(store: &ChatStore, caller: &Principal, id: TokenId) -> Result<ApiToken, ChatError> {
	let token = store.token_by_id(id).await?.ok_or(ChatError::NotFound("token"))?;
	if !can_manage(caller, &token) {
		// Hide existence of other users' tokens.
		return Err(ChatError::NotFound("token"));
	}
	Ok(token)
}

/// Revoke a token. Idempotent: revoking an already-revoked token returns the
/// same terminal state.
pub async fn revoke(store: &ChatStore, caller: &Principal, id: TokenId) -> Result<ApiToken, ChatError> {
	update(store, caller, id, None, Some(true)).await
}

/// Rename and/or change the revocation flag. Revocation is terminal:
/// `revoked: false` against a revoked token is a validation error.
pub async fn update(
	store: &ChatStore,
	caller: &Principal,
	id: TokenId,
	rename: Option<String>,
	revoked: Option<bool>,
) -> Result<ApiToken, ChatError> {
	let token = get(store, caller, id).await?;

	if let Some(name) = rename {
		let name = name.trim().to_string();
		if name.is_empty() {
			return Err(ChatError::validation("token name must not be empty"));
		}
		store.set_token_name(id, &name).await?;
	}

	match revoked {
		Some(true) if !token.revoked => {
			store.revoke_token(id).await?;
			info!(token_id = %id, "token revoked");
		}
		Some(false) if token.revoked => {
			return Err(ChatError::validation("token revocation cannot be undone"));
		}
		_ => {}
	}

	store.token_by_id(id).await?.ok_or(ChatError::NotFound("token"))
}

pub async fn delete(store: &ChatStore, caller: &Principal, id: TokenId) -> Result<(), ChatError> {
	let token = get(store, caller, id).await?;
	store.delete_token(token.id).await?;
	info!(token_id = %id, "token deleted");
	Ok(())
}
