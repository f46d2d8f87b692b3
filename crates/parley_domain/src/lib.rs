#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors for parsing identifiers and enums from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

macro_rules! uuid_id {
	($(#[$doc:meta])* $name:ident) => {
		$(#[$doc])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub Uuid);

		impl $name {
			/// Create a new random id.
			pub fn new_v4() -> Self {
				Self(Uuid::new_v4())
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				let s = s.trim();
				if s.is_empty() {
					return Err(ParseIdError::Empty);
				}
				Uuid::parse_str(s)
					.map(Self)
					.map_err(|e| ParseIdError::InvalidFormat(e.to_string()))
			}
		}
	};
}

uuid_id!(
	/// Unique user identifier.
	UserId
);
uuid_id!(
	/// Unique room identifier.
	RoomId
);
uuid_id!(
	/// Unique API token identifier.
	TokenId
);

/// Server-assigned message identifier. Monotonically increasing per store,
/// used to break `created_at` ties when ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// User role. Admins may manage other users' tokens and delete resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	User,
	Admin,
}

impl Role {
	pub const fn as_str(self) -> &'static str {
		match self {
			Role::User => "user",
			Role::Admin => "admin",
		}
	}

	pub const fn is_admin(self) -> bool {
		matches!(self, Role::Admin)
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Role {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}
		match s.to_ascii_lowercase().as_str() {
			"user" => Ok(Role::User),
			"admin" => Ok(Role::Admin),
			other => Err(ParseIdError::InvalidFormat(format!("unknown role: {other}"))),
		}
	}
}

/// How a principal was authenticated for the current request/connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
	Session,
	Token,
}

/// API token kind. `Client` tokens are intended for headless integrations;
/// kind affects creation rules only, never effective permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
	#[serde(rename = "USER")]
	User,
	#[serde(rename = "CLIENT")]
	Client,
}

impl TokenKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			TokenKind::User => "USER",
			TokenKind::Client => "CLIENT",
		}
	}
}

impl FromStr for TokenKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_uppercase().as_str() {
			"" => Err(ParseIdError::Empty),
			"USER" => Ok(TokenKind::User),
			"CLIENT" => Ok(TokenKind::Client),
			other => Err(ParseIdError::InvalidFormat(format!("unknown token kind: {other}"))),
		}
	}
}

/// Membership role inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberRole {
	#[serde(rename = "ADMIN")]
	Admin,
	#[serde(rename = "MEMBER")]
	Member,
}

impl MemberRole {
	pub const fn as_str(self) -> &'static str {
		match self {
			MemberRole::Admin => "ADMIN",
			MemberRole::Member => "MEMBER",
		}
	}
}

impl FromStr for MemberRole {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_uppercase().as_str() {
			"" => Err(ParseIdError::Empty),
			"ADMIN" => Ok(MemberRole::Admin),
			"MEMBER" => Ok(MemberRole::Member),
			other => Err(ParseIdError::InvalidFormat(format!("unknown member role: {other}"))),
		}
	}
}

/// The subset of rooms a token's permissions apply to.
///
/// Wire/storage encoding is either the string `"all"` or an explicit array
/// of room ids. An empty array normalizes to `All`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RoomScopeRepr", into = "RoomScopeRepr")]
pub enum RoomScope {
	All,
	Rooms(Vec<RoomId>),
}

impl RoomScope {
	/// Build a scope from an explicit list; empty lists mean `All`.
	pub fn rooms(rooms: Vec<RoomId>) -> Self {
		if rooms.is_empty() { RoomScope::All } else { RoomScope::Rooms(rooms) }
	}

	pub fn covers(&self, room: RoomId) -> bool {
		match self {
			RoomScope::All => true,
			RoomScope::Rooms(rooms) => rooms.contains(&room),
		}
	}
}

impl Default for RoomScope {
	fn default() -> Self {
		RoomScope::All
	}
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RoomScopeRepr {
	Keyword(String),
	Rooms(Vec<RoomId>),
}

impl From<RoomScope> for RoomScopeRepr {
	fn from(scope: RoomScope) -> Self {
		match scope {
			RoomScope::All => RoomScopeRepr::Keyword("all".to_string()),
			RoomScope::Rooms(rooms) => RoomScopeRepr::Rooms(rooms),
		}
	}
}

impl TryFrom<RoomScopeRepr> for RoomScope {
	type Error = String;

	fn try_from(repr: RoomScopeRepr) -> Result<Self, Self::Error> {
		match repr {
			RoomScopeRepr::Keyword(kw) if kw.eq_ignore_ascii_case("all") => Ok(RoomScope::All),
			RoomScopeRepr::Keyword(kw) => Err(format!("unknown room scope keyword: {kw:?} (expected \"all\" or a list)")),
			RoomScopeRepr::Rooms(rooms) => Ok(RoomScope::rooms(rooms)),
		}
	}
}

/// An action a principal may attempt against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
	Read,
	Write,
	Delete,
}

impl Action {
	pub const fn as_str(self) -> &'static str {
		match self {
			Action::Read => "read",
			Action::Write => "write",
			Action::Delete => "delete",
		}
	}
}

/// Typed token permission set with explicit defaults, validated at token
/// creation time rather than trusted at use time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenPermissions {
	pub read: bool,
	pub write: bool,
	pub delete: bool,
	#[serde(rename = "rooms")]
	pub room_scope: RoomScope,
}

impl TokenPermissions {
	pub const fn allows(&self, action: Action) -> bool {
		match action {
			Action::Read => self.read,
			Action::Write => self.write,
			Action::Delete => self.delete,
		}
	}

	/// Full-access set granted to session principals of admins.
	pub const fn full() -> Self {
		Self {
			read: true,
			write: true,
			delete: true,
			room_scope: RoomScope::All,
		}
	}
}

impl Default for TokenPermissions {
	fn default() -> Self {
		Self {
			read: true,
			write: false,
			delete: false,
			room_scope: RoomScope::All,
		}
	}
}

/// Resolved identity and permission set for one request/connection.
///
/// Created fresh per resolution, never persisted, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
	pub user_id: UserId,
	pub role: Role,
	pub auth_mode: AuthMode,
	pub permissions: TokenPermissions,
}

impl Principal {
	/// Principal for a session-authenticated user. Sessions read and write;
	/// only admins delete. Room scope is `All` because session access to
	/// private rooms is decided by membership rows downstream.
	pub fn for_session(user_id: UserId, role: Role) -> Self {
		Self {
			user_id,
			role,
			auth_mode: AuthMode::Session,
			permissions: TokenPermissions {
				read: true,
				write: true,
				delete: role.is_admin(),
				room_scope: RoomScope::All,
			},
		}
	}

	/// Principal for a token-authenticated caller. Permissions come verbatim
	/// from the token record; the role is the owning user's role, so a token
	/// never elevates privilege beyond its declared permissions.
	pub fn for_token(user_id: UserId, owner_role: Role, permissions: TokenPermissions) -> Self {
		Self {
			user_id,
			role: owner_role,
			auth_mode: AuthMode::Token,
			permissions,
		}
	}

	pub const fn is_admin(&self) -> bool {
		self.role.is_admin()
	}
}

/// A string holding a secret. Redacted in `Debug`/`Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(value: String) -> Self {
		Self(value)
	}

	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

/// Number of secret prefix characters shown in masked token displays.
pub const TOKEN_MASK_PREFIX_LEN: usize = 8;

/// Persisted long-lived bearer credential.
#[derive(Debug, Clone)]
pub struct ApiToken {
	pub id: TokenId,
	pub secret: SecretString,
	pub owner_user_id: UserId,
	pub kind: TokenKind,
	pub name: String,
	pub permissions: TokenPermissions,
	pub created_at: i64,
	pub expires_at: Option<i64>,
	pub last_used_at: Option<i64>,
	pub revoked: bool,
}

impl ApiToken {
	pub fn is_expired(&self, now_ms: i64) -> bool {
		self.expires_at.is_some_and(|exp| exp <= now_ms)
	}

	/// Fixed-length prefix plus ellipsis; the only form in which a stored
	/// secret may ever be shown after creation.
	pub fn masked_secret(&self) -> String {
		mask_secret(self.secret.expose())
	}
}

/// Mask a token secret for display.
pub fn mask_secret(secret: &str) -> String {
	let prefix: String = secret.chars().take(TOKEN_MASK_PREFIX_LEN).collect();
	format!("{prefix}...")
}

/// Registered user account.
#[derive(Debug, Clone, Serialize)]
pub struct User {
	pub id: UserId,
	pub username: String,
	#[serde(skip_serializing)]
	pub password_digest: String,
	pub role: Role,
	pub created_at: i64,
}

/// Chat room.
#[derive(Debug, Clone, Serialize)]
pub struct Room {
	pub id: RoomId,
	pub name: String,
	pub description: String,
	pub is_private: bool,
	pub created_by: UserId,
	pub created_at: i64,
}

/// Room membership row.
#[derive(Debug, Clone, Serialize)]
pub struct RoomMember {
	pub room_id: RoomId,
	pub user_id: UserId,
	pub role: MemberRole,
}

/// Persisted chat message. Append-only; ordered by `created_at` ascending,
/// ties broken by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
	pub id: MessageId,
	pub room_id: RoomId,
	pub user_id: UserId,
	pub content: String,
	pub created_at: i64,
}

/// Error taxonomy shared by the HTTP surface and the realtime gateway.
#[derive(Debug, Error)]
pub enum ChatError {
	/// No credential, or the credential failed to resolve.
	#[error("unauthenticated")]
	Unauthenticated,

	/// Valid credential, insufficient permission.
	#[error("forbidden: {0}")]
	Forbidden(String),

	#[error("{0} not found")]
	NotFound(&'static str),

	#[error("{0}")]
	Validation(String),

	#[error("{0}")]
	Conflict(String),

	/// Token past its `expires_at`; invalid regardless of `revoked`.
	#[error("token expired")]
	Expired,

	/// Token revoked; terminal state.
	#[error("token revoked")]
	Revoked,

	/// Persistence I/O failure. Message is for logs; surfaces sanitized.
	#[error("store failure: {0}")]
	Store(String),
}

impl ChatError {
	pub fn forbidden(detail: impl Into<String>) -> Self {
		ChatError::Forbidden(detail.into())
	}

	pub fn validation(detail: impl Into<String>) -> Self {
		ChatError::Validation(detail.into())
	}

	pub fn store(err: impl fmt::Display) -> Self {
		ChatError::Store(err.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn role_parse_and_display() {
		assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
		assert_eq!("User".parse::<Role>().unwrap(), Role::User);
		assert!("root".parse::<Role>().is_err());
		assert_eq!(Role::Admin.to_string(), "admin");
	}

	#[test]
	fn token_kind_roundtrip() {
		assert_eq!("CLIENT".parse::<TokenKind>().unwrap(), TokenKind::Client);
		assert_eq!("user".parse::<TokenKind>().unwrap(), TokenKind::User);
		assert_eq!(TokenKind::Client.as_str(), "CLIENT");
	}

	#[test]
	fn room_scope_serde_all_keyword() {
		let scope: RoomScope = serde_json::from_str("\"all\"").unwrap();
		assert_eq!(scope, RoomScope::All);
		assert_eq!(serde_json::to_string(&RoomScope::All).unwrap(), "\"all\"");
	}

	#[test]
	fn room_scope_empty_list_means_all() {
		let scope: RoomScope = serde_json::from_str("[]").unwrap();
		assert_eq!(scope, RoomScope::All);
		assert!(scope.covers(RoomId::new_v4()));
	}

	#[test]
	fn room_scope_explicit_list() {
		let a = RoomId::new_v4();
		let b = RoomId::new_v4();
		let json = format!("[\"{a}\"]");
		let scope: RoomScope = serde_json::from_str(&json).unwrap();
		assert!(scope.covers(a));
		assert!(!scope.covers(b));
	}

	#[test]
	fn room_scope_rejects_unknown_keyword() {
		assert!(serde_json::from_str::<RoomScope>("\"everything\"").is_err());
	}

	#[test]
	fn permission_defaults_are_read_only() {
		let perms: TokenPermissions = serde_json::from_str("{}").unwrap();
		assert!(perms.allows(Action::Read));
		assert!(!perms.allows(Action::Write));
		assert!(!perms.allows(Action::Delete));
		assert_eq!(perms.room_scope, RoomScope::All);
	}

	#[test]
	fn session_principal_delete_tracks_role() {
		let admin = Principal::for_session(UserId::new_v4(), Role::Admin);
		let user = Principal::for_session(UserId::new_v4(), Role::User);
		assert!(admin.permissions.allows(Action::Delete));
		assert!(!user.permissions.allows(Action::Delete));
		assert!(user.permissions.allows(Action::Write));
	}

	#[test]
	fn token_principal_keeps_permissions_verbatim() {
		let perms = TokenPermissions {
			read: true,
			write: false,
			delete: false,
			room_scope: RoomScope::All,
		};
		let p = Principal::for_token(UserId::new_v4(), Role::Admin, perms.clone());
		// An admin-owned token still only does what it declares.
		assert_eq!(p.permissions, perms);
		assert!(p.is_admin());
	}

	#[test]
	fn masked_secret_is_prefix_plus_ellipsis() {
		assert_eq!(mask_secret("abcdefgh0123456789"), "abcdefgh...");
		assert_eq!(mask_secret("short"), "short...");
	}

	#[test]
	fn expiry_is_inclusive_of_now() {
		let token = ApiToken {
			id: TokenId::new_v4(),
			secret: SecretString::new("s".into()),
			owner_user_id: UserId::new_v4(),
			kind: TokenKind::User,
			name: "t".into(),
			permissions: TokenPermissions::default(),
			created_at: 0,
			expires_at: Some(1_000),
			last_used_at: None,
			revoked: false,
		};
		assert!(token.is_expired(1_000));
		assert!(token.is_expired(2_000));
		assert!(!token.is_expired(999));
	}

	#[test]
	fn secret_string_redacts_debug() {
		let s = SecretString::new("hunter2".into());
		assert!(!format!("{s:?}").contains("hunter2"));
		assert_eq!(s.expose(), "hunter2");
	}
}
