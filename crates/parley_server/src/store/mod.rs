#![forbid(unsafe_code)]

use anyhow::Context as _;
use parley_domain::{
	ApiToken, ChatError, MemberRole, Message, MessageId, Role, Room, RoomId, RoomMember, SecretString, TokenId, TokenKind,
	TokenPermissions, User, UserId,
};

use crate::util::time::unix_ms_now;

/// Sqlite-backed chat store: users, rooms, members, messages, tokens.
///
/// Cheap to clone; all methods take `&self` and go through the pool.
#[derive(Clone)]
pub struct ChatStore {
	pool: sqlx::SqlitePool,
}

fn map_err(e: sqlx::Error) -> ChatError {
	ChatError::store(e)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
	matches!(e, sqlx::Error::Database(db) if db.kind() == sqlx::error::ErrorKind::UniqueViolation)
}

fn parse_id<T: std::str::FromStr>(raw: &str, what: &'static str) -> Result<T, ChatError>
where
	T::Err: std::fmt::Display,
{
	T::from_str(raw).map_err(|e| ChatError::store(format!("corrupt {what} in store: {e}")))
}

type UserRow = (String, String, String, String, i64);

fn user_from_row(row: UserRow) -> Result<User, ChatError> {
	let (id, username, password_digest, role, created_at) = row;
	Ok(User {
		id: parse_id(&id, "user id")?,
		username,
		password_digest,
		role: parse_id::<Role>(&role, "user role")?,
		created_at,
	})
}

type RoomRow = (String, String, String, bool, String, i64);

fn room_from_row(row: RoomRow) -> Result<Room, ChatError> {
	let (id, name, description, is_private, created_by, created_at) = row;
	Ok(Room {
		id: parse_id(&id, "room id")?,
		name,
		description,
		is_private,
		created_by: parse_id(&created_by, "room creator id")?,
		created_at,
	})
}

type MessageRow = (i64, String, String, String, i64);

fn message_from_row(row: MessageRow) -> Result<Message, ChatError> {
	let (id, room_id, user_id, content, created_at) = row;
	Ok(Message {
		id: MessageId(id),
		room_id: parse_id(&room_id, "message room id")?,
		user_id: parse_id(&user_id, "message user id")?,
		content,
		created_at,
	})
}

type TokenRow = (
	String,
	String,
	String,
	String,
	String,
	String,
	i64,
	Option<i64>,
	Option<i64>,
	bool,
);

fn token_from_row(row: TokenRow) -> Result<ApiToken, ChatError> {
	let (id, secret, owner_user_id, kind, name, permissions, created_at, expires_at, last_used_at, revoked) = row;
	let permissions: TokenPermissions =
		serde_json::from_str(&permissions).map_err(|e| ChatError::store(format!("corrupt token permissions: {e}")))?;
	Ok(ApiToken {
		id: parse_id(&id, "token id")?,
		secret: SecretString::new(secret),
		owner_user_id: parse_id(&owner_user_id, "token owner id")?,
		kind: parse_id::<TokenKind>(&kind, "token kind")?,
		name,
		permissions,
		created_at,
		expires_at,
		last_used_at,
		revoked,
	})
}

const SELECT_USER: &str = "SELECT id, username, password_digest, role, created_at FROM users";
const SELECT_ROOM: &str = "SELECT id, name, description, is_private, created_by, created_at FROM rooms";
const SELECT_MESSAGE: &str = "SELECT id, room_id, user_id, content, created_at FROM messages";
const SELECT_TOKEN: &str = "SELECT id, secret, owner_user_id, kind, name, permissions, created_at, \
	expires_at, last_used_at, revoked FROM api_tokens";

impl ChatStore {
	/// Connect and run pending migrations.
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		// A separate `:memory:` database exists per connection; pin the pool
		// to a single connection so the schema is visible to every query.
		let pool = if database_url.contains(":memory:") {
			sqlx::sqlite::SqlitePoolOptions::new()
				.max_connections(1)
				.connect(database_url)
				.await
				.context("connect sqlite")?
		} else {
			sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?
		};
		sqlx::migrate!("./migrations").run(&pool).await.context("run migrations")?;
		Ok(Self { pool })
	}

	// -- users --

	pub async fn create_user(&self, username: &str, password_digest: &str, role: Role) -> Result<User, ChatError> {
		let user = User {
			id: UserId::new_v4(),
			username: username.to_string(),
			password_digest: password_digest.to_string(),
			role,
			created_at: unix_ms_now(),
		};

		sqlx::query("INSERT INTO users (id, username, password_digest, role, created_at) VALUES (?, ?, ?, ?, ?)")
			.bind(user.id.to_string())
			.bind(&user.username)
			.bind(&user.password_digest)
			.bind(user.role.as_str())
			.bind(user.created_at)
			.execute(&self.pool)
			.await
			.map_err(|e| {
				if is_unique_violation(&e) {
					ChatError::Conflict(format!("username {username:?} is taken"))
				} else {
					map_err(e)
				}
			})?;

		Ok(user)
	}

	pub async fn user_by_id(&self, id: UserId) -> Result<Option<User>, ChatError> {
		let row: Option<UserRow> = sqlx::query_as(&format!("{SELECT_USER} WHERE id = ?"))
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await
			.map_err(map_err)?;
		row.map(user_from_row).transpose()
	}

	pub async fn user_by_username(&self, username: &str) -> Result<Option<User>, ChatError> {
		let row: Option<UserRow> = sqlx::query_as(&format!("{SELECT_USER} WHERE username = ?"))
			.bind(username)
			.fetch_optional(&self.pool)
			.await
			.map_err(map_err)?;
		row.map(user_from_row).transpose()
	}

	// -- rooms --

	/// Create a room; the creator becomes an ADMIN member in the same transaction.
	pub async fn create_room(
		&self,
		name: &str,
		description: &str,
		is_private: bool,
		created_by: UserId,
	) -> Result<Room, ChatError> {
		let room = Room {
			id: RoomId::new_v4(),
			name: name.to_string(),
			description: description.to_string(),
			is_private,
			created_by,
			created_at: unix_ms_now(),
		};

		let mut tx = self.pool.begin().await.map_err(map_err)?;
		sqlx::query("INSERT INTO rooms (id, name, description, is_private, created_by, created_at) VALUES (?, ?, ?, ?, ?, ?)")
			.bind(room.id.to_string())
			.bind(&room.name)
			.bind(&room.description)
			.bind(room.is_private)
			.bind(room.created_by.to_string())
			.bind(room.created_at)
			.execute(&mut *tx)
			.await
			.map_err(map_err)?;
		sqlx::query("INSERT INTO room_members (room_id, user_id, role) VALUES (?, ?, ?)")
			.bind(room.id.to_string())
			.bind(created_by.to_string())
			.bind(MemberRole::Admin.as_str())
			.execute(&mut *tx)
			.await
			.map_err(map_err)?;
		tx.commit().await.map_err(map_err)?;

		Ok(room)
	}

	/// Rooms the user can see: public rooms plus private rooms they hold a
	/// membership row for. Private rooms never leak into other users' listings.
	pub async fn rooms_visible_to(&self, user_id: UserId) -> Result<Vec<Room>, ChatError> {
		let rows: Vec<RoomRow> = sqlx::query_as(&format!(
			"{SELECT_ROOM} WHERE is_private = 0 \
			OR id IN (SELECT room_id FROM room_members WHERE user_id = ?) \
			ORDER BY created_at, id"
		))
		.bind(user_id.to_string())
		.fetch_all(&self.pool)
		.await
		.map_err(map_err)?;
		rows.into_iter().map(room_from_row).collect()
	}

	pub async fn room_by_id(&self, id: RoomId) -> Result<Option<Room>, ChatError> {
		let row: Option<RoomRow> = sqlx::query_as(&format!("{SELECT_ROOM} WHERE id = ?"))
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await
			.map_err(map_err)?;
		row.map(room_from_row).transpose()
	}

	pub async fn update_room(
		&self,
		id: RoomId,
		name: &str,
		description: &str,
		is_private: bool,
	) -> Result<Option<Room>, ChatError> {
		let updated = sqlx::query("UPDATE rooms SET name = ?, description = ?, is_private = ? WHERE id = ?")
			.bind(name)
			.bind(description)
			.bind(is_private)
			.bind(id.to_string())
			.execute(&self.pool)
			.await
			.map_err(map_err)?;

		if updated.rows_affected() == 0 {
			return Ok(None);
		}
		self.room_by_id(id).await
	}

	pub async fn delete_room(&self, id: RoomId) -> Result<bool, ChatError> {
		let deleted = sqlx::query("DELETE FROM rooms WHERE id = ?")
			.bind(id.to_string())
			.execute(&self.pool)
			.await
			.map_err(map_err)?;
		Ok(deleted.rows_affected() > 0)
	}

	// -- members --

	pub async fn member_role(&self, room_id: RoomId, user_id: UserId) -> Result<Option<MemberRole>, ChatError> {
		let row: Option<(String,)> = sqlx::query_as("SELECT role FROM room_members WHERE room_id = ? AND user_id = ?")
			.bind(room_id.to_string())
			.bind(user_id.to_string())
			.fetch_optional(&self.pool)
			.await
			.map_err(map_err)?;
		row.map(|(role,)| parse_id::<MemberRole>(&role, "member role")).transpose()
	}

	pub async fn add_member(&self, member: &RoomMember) -> Result<(), ChatError> {
		sqlx::query(
			"INSERT INTO room_members (room_id, user_id, role) VALUES (?, ?, ?) \
			ON CONFLICT(room_id, user_id) DO UPDATE SET role = excluded.role",
		)
		.bind(member.room_id.to_string())
		.bind(member.user_id.to_string())
		.bind(member.role.as_str())
		.execute(&self.pool)
		.await
		.map_err(map_err)?;
		Ok(())
	}

	// -- messages --

	/// Append a message; the returned id is the monotonically increasing row id.
	pub async fn append_message(&self, room_id: RoomId, user_id: UserId, content: &str) -> Result<Message, ChatError> {
		let created_at = unix_ms_now();
		let result = sqlx::query("INSERT INTO messages (room_id, user_id, content, created_at) VALUES (?, ?, ?, ?)")
			.bind(room_id.to_string())
			.bind(user_id.to_string())
			.bind(content)
			.bind(created_at)
			.execute(&self.pool)
			.await
			.map_err(map_err)?;

		Ok(Message {
			id: MessageId(result.last_insert_rowid()),
			room_id,
			user_id,
			content: content.to_string(),
			created_at,
		})
	}

	/// Most recent `limit` messages in chronological order
	/// (`created_at ASC, id ASC`).
	pub async fn recent_messages(&self, room_id: RoomId, limit: u32) -> Result<Vec<Message>, ChatError> {
		let rows: Vec<MessageRow> =
			sqlx::query_as(&format!("{SELECT_MESSAGE} WHERE room_id = ? ORDER BY created_at DESC, id DESC LIMIT ?"))
				.bind(room_id.to_string())
				.bind(limit)
				.fetch_all(&self.pool)
				.await
				.map_err(map_err)?;

		let mut messages = rows.into_iter().map(message_from_row).collect::<Result<Vec<_>, _>>()?;
		messages.reverse();
		Ok(messages)
	}

	// -- tokens --

	pub async fn insert_token(&self, token: &ApiToken) -> Result<(), ChatError> {
		sqlx::query(
			"INSERT INTO api_tokens (id, secret, owner_user_id, kind, name, permissions, created_at, expires_at, last_used_at, revoked) \
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(token.id.to_string())
		.bind(token.secret.expose())
		.bind(token.owner_user_id.to_string())
		.bind(token.kind.as_str())
		.bind(&token.name)
		.bind(serde_json::to_string(&token.permissions).map_err(ChatError::store)?)
		.bind(token.created_at)
		.bind(token.expires_at)
		.bind(token.last_used_at)
		.bind(token.revoked)
		.execute(&self.pool)
		.await
		.map_err(|e| {
			if is_unique_violation(&e) {
				ChatError::Conflict("token secret collision".to_string())
			} else {
				map_err(e)
			}
		})?;
		Ok(())
	}

	pub async fn token_by_secret(&self, secret: &str) -> Result<Option<ApiToken>, ChatError> {
		let row: Option<TokenRow> = sqlx::query_as(&format!("{SELECT_TOKEN} WHERE secret = ?"))
			.bind(secret)
			.fetch_optional(&self.pool)
			.await
			.map_err(map_err)?;
		row.map(token_from_row).transpose()
	}

	pub async fn token_by_id(&self, id: TokenId) -> Result<Option<ApiToken>, ChatError> {
		let row: Option<TokenRow> = sqlx::query_as(&format!("{SELECT_TOKEN} WHERE id = ?"))
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await
			.map_err(map_err)?;
		row.map(token_from_row).transpose()
	}

	pub async fn tokens_for_owner(&self, owner: UserId) -> Result<Vec<ApiToken>, ChatError> {
		let rows: Vec<TokenRow> = sqlx::query_as(&format!("{SELECT_TOKEN} WHERE owner_user_id = ? ORDER BY created_at, id"))
			.bind(owner.to_string())
			.fetch_all(&self.pool)
			.await
			.map_err(map_err)?;
		rows.into_iter().map(token_from_row).collect()
	}

	pub async fn all_tokens(&self) -> Result<Vec<ApiToken>, ChatError> {
		let rows: Vec<TokenRow> = sqlx::query_as(&format!("{SELECT_TOKEN} ORDER BY created_at, id"))
			.fetch_all(&self.pool)
			.await
			.map_err(map_err)?;
		rows.into_iter().map(token_from_row).collect()
	}

	pub async fn set_token_name(&self, id: TokenId, name: &str) -> Result<(), ChatError> {
		sqlx::query("UPDATE api_tokens SET name = ? WHERE id = ?")
			.bind(name)
			.bind(id.to_string())
			.execute(&self.pool)
			.await
			.map_err(map_err)?;
		Ok(())
	}

	pub async fn revoke_token(&self, id: TokenId) -> Result<(), ChatError> {
		sqlx::query("UPDATE api_tokens SET revoked = 1 WHERE id = ?")
			.bind(id.to_string())
			.execute(&self.pool)
			.await
			.map_err(map_err)?;
		Ok(())
	}

	pub async fn touch_token_last_used(&self, id: TokenId, now_ms: i64) -> Result<(), ChatError> {
		sqlx::query("UPDATE api_tokens SET last_used_at = ? WHERE id = ?")
			.bind(now_ms)
			.bind(id.to_string())
			.execute(&self.pool)
			.await
			.map_err(map_err)?;
		Ok(())
	}

	pub async fn delete_token(&self, id: TokenId) -> Result<bool, ChatError> {
		let deleted = sqlx::query("DELETE FROM api_tokens WHERE id = ?")
			.bind(id.to_string())
			.execute(&self.pool)
			.await
			.map_err(map_err)?;
		Ok(deleted.rows_affected() > 0)
	}
}
