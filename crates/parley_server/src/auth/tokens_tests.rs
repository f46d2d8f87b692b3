#![forbid(unsafe_code)]

use parley_domain::{
	ApiToken, ChatError, Principal, Role, SecretString, TokenId, TokenKind, TokenPermissions, User,
};

use crate::auth::tokens::{self, CreateTokenRequest};
use crate::store::ChatStore;
use crate::util::time::unix_ms_now;

async fn mem_store() -> ChatStore {
	ChatStore::connect("sqlite::memory:").await.expect("connect store")
}

async fn seed_user(store: &ChatStore, username: &str, role: Role) -> User {
	store.create_user(username, "digest", role).await.expect("create user")
}

fn session(user: &User) -> Principal {
	Principal::for_session(user.id, user.role)
}

fn request(name: &str) -> CreateTokenRequest {
	CreateTokenRequest {
		name: name.to_string(),
		kind: TokenKind::User,
		permissions: TokenPermissions::default(),
		expires_at: None,
		owner_user_id: None,
	}
}

#[tokio::test]
async fn create_returns_full_secret_once() {
	let store = mem_store().await;
	let alice = seed_user(&store, "alice", Role::User).await;

	let minted = tokens::create(&store, &session(&alice), request("ci")).await.expect("create");
	assert!(minted.secret.len() >= 40, "32 random bytes base64url encode to 43 chars");
	assert_eq!(minted.token.masked_secret(), format!("{}...", &minted.secret[..8]));

	let listed = tokens::list(&store, &session(&alice)).await.expect("list");
	assert_eq!(listed.len(), 1);
	assert_eq!(listed[0].secret.expose(), minted.secret);
}

#[tokio::test]
async fn non_admin_cannot_mint_for_another_user() {
	let store = mem_store().await;
	let alice = seed_user(&store, "alice", Role::User).await;
	let bob = seed_user(&store, "bob", Role::User).await;

	let mut req = request("sneaky");
	req.owner_user_id = Some(bob.id);
	let err = tokens::create(&store, &session(&alice), req).await.unwrap_err();
	assert!(matches!(err, ChatError::Forbidden(_)));

	// Self-service CLIENT tokens are open to any authenticated user.
	let mut req = request("integration");
	req.kind = TokenKind::Client;
	assert!(tokens::create(&store, &session(&alice), req).await.is_ok());
}

#[tokio::test]
async fn admin_mints_for_other_users_and_lists_all() {
	let store = mem_store().await;
	let root = seed_user(&store, "root", Role::Admin).await;
	let bob = seed_user(&store, "bob", Role::User).await;

	let mut req = request("bot");
	req.kind = TokenKind::Client;
	req.owner_user_id = Some(bob.id);
	let minted = tokens::create(&store, &session(&root), req).await.expect("create");
	assert_eq!(minted.token.owner_user_id, bob.id);

	tokens::create(&store, &session(&root), request("own")).await.expect("create");

	assert_eq!(tokens::list(&store, &session(&root)).await.expect("list").len(), 2);
	assert_eq!(tokens::list(&store, &session(&bob)).await.expect("list").len(), 1);
}

#[tokio::test]
async fn validate_rejects_unknown_revoked_and_expired_distinctly() {
	let store = mem_store().await;
	let alice = seed_user(&store, "alice", Role::User).await;

	assert!(matches!(
		tokens::validate(&store, "no-such-secret").await.unwrap_err(),
		ChatError::Unauthenticated
	));

	let minted = tokens::create(&store, &session(&alice), request("ci")).await.expect("create");
	tokens::revoke(&store, &session(&alice), minted.token.id).await.expect("revoke");
	assert!(matches!(
		tokens::validate(&store, &minted.secret).await.unwrap_err(),
		ChatError::Revoked
	));

	let expired = ApiToken {
		id: TokenId::new_v4(),
		secret: SecretString::new("expired-secret".to_string()),
		owner_user_id: alice.id,
		kind: TokenKind::User,
		name: "old".to_string(),
		permissions: TokenPermissions::default(),
		created_at: 0,
		expires_at: Some(unix_ms_now() - 1_000),
		last_used_at: None,
		revoked: false,
	};
	store.insert_token(&expired).await.expect("insert");
	assert!(matches!(
		tokens::validate(&store, "expired-secret").await.unwrap_err(),
		ChatError::Expired
	));
}

#[tokio::test]
async fn last_used_moves_only_on_successful_validation() {
	let store = mem_store().await;
	let alice = seed_user(&store, "alice", Role::User).await;
	let minted = tokens::create(&store, &session(&alice), request("ci")).await.expect("create");

	assert!(minted.token.last_used_at.is_none());
	tokens::validate(&store, &minted.secret).await.expect("validate");
	let after = tokens::get(&store, &session(&alice), minted.token.id).await.expect("get");
	assert!(after.last_used_at.is_some());

	tokens::revoke(&store, &session(&alice), minted.token.id).await.expect("revoke");
	let before_failed = tokens::get(&store, &session(&alice), minted.token.id)
		.await
		.expect("get")
		.last_used_at;
	tokens::validate(&store, &minted.secret).await.unwrap_err();
	let after_failed = tokens::get(&store, &session(&alice), minted.token.id)
		.await
		.expect("get")
		.last_used_at;
	assert_eq!(before_failed, after_failed);
}

#[tokio::test]
async fn revoke_is_idempotent_and_unrevoke_is_rejected() {
	let store = mem_store().await;
	let alice = seed_user(&store, "alice", Role::User).await;
	let minted = tokens::create(&store, &session(&alice), request("ci")).await.expect("create");

	let first = tokens::revoke(&store, &session(&alice), minted.token.id).await.expect("revoke");
	let second = tokens::revoke(&store, &session(&alice), minted.token.id).await.expect("revoke again");
	assert!(first.revoked && second.revoked);

	let err = tokens::update(&store, &session(&alice), minted.token.id, None, Some(false))
		.await
		.unwrap_err();
	assert!(matches!(err, ChatError::Validation(_)));
}

#[tokio::test]
async fn other_users_tokens_are_invisible() {
	let store = mem_store().await;
	let alice = seed_user(&store, "alice", Role::User).await;
	let bob = seed_user(&store, "bob", Role::User).await;
	let minted = tokens::create(&store, &session(&alice), request("ci")).await.expect("create");

	let err = tokens::get(&store, &session(&bob), minted.token.id).await.unwrap_err();
	assert!(matches!(err, ChatError::NotFound(_)));

	let err = tokens::delete(&store, &session(&bob), minted.token.id).await.unwrap_err();
	assert!(matches!(err, ChatError::NotFound(_)));

	// The owner can hard-delete.
	tokens::delete(&store, &session(&alice), minted.token.id).await.expect("delete");
	assert!(tokens::list(&store, &session(&alice)).await.expect("list").is_empty());
}

#[tokio::test]
async fn create_validates_name_and_expiry() {
	let store = mem_store().await;
	let alice = seed_user(&store, "alice", Role::User).await;

	let err = tokens::create(&store, &session(&alice), request("   ")).await.unwrap_err();
	assert!(matches!(err, ChatError::Validation(_)));

	let mut req = request("ci");
	req.expires_at = Some(unix_ms_now() - 1);
	let err = tokens::create(&store, &session(&alice), req).await.unwrap_err();
	assert!(matches!(err, ChatError::Validation(_)));
}
