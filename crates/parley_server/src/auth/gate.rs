#![forbid(unsafe_code)]

use parley_domain::{Action, AuthMode, ChatError, MemberRole, Principal, Room};

use crate::store::ChatStore;

/// Deny-by-default authorization decision for one action against an optional
/// room, evaluated identically for HTTP routes and gateway commands:
///
/// 1. The principal's permission set must allow the action.
/// 2. Actions without a room stop here.
/// 3. Public rooms are open to every principal that passed step 1.
/// 4. Private rooms require a membership row, or, for token principals, a
///    room scope covering the room.
pub async fn authorize(
	store: &ChatStore,
	principal: &Principal,
	action: Action,
	room: Option<&Room>,
) -> Result<(), ChatError> {
	if !principal.permissions.allows(action) {
		return Err(ChatError::forbidden(format!("missing {} permission", action.as_str())));
	}

	let Some(room) = room else {
		return Ok(());
	};
	if !room.is_private {
		return Ok(());
	}

	if store.member_role(room.id, principal.user_id).await?.is_some() {
		return Ok(());
	}

	if principal.auth_mode == AuthMode::Token && principal.permissions.room_scope.covers(room.id) {
		return Ok(());
	}

	Err(ChatError::forbidden("not a member of this private room"))
}

/// Room management (update/delete) requires an ADMIN membership row or being
/// the room's creator. A server-wide admin role alone is not enough.
pub async fn authorize_room_admin(store: &ChatStore, principal: &Principal, room: &Room) -> Result<(), ChatError> {
	if principal.user_id == room.created_by {
		return Ok(());
	}

	match store.member_role(room.id, principal.user_id).await? {
		Some(MemberRole::Admin) => Ok(()),
		_ => Err(ChatError::forbidden("room admin required")),
	}
}
