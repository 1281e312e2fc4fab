//! Document mutations and queries for the giveaway.
//!
//! The mutating functions are meant to run inside a store update; each one
//! checks everything it needs before it touches the document, because the
//! store keeps partial changes of a failed mutation.

use chrono::{DateTime, Utc};

use crate::errors::ServiceError;
use crate::giveaway::domain::{
    Address, CompletedTask, DroplistDocument, DroplistEntry, LeaderboardRow, MetadataField,
    MetadataUpdateRequest, TasksDocument, User, UsersDocument,
};

pub const LEADERBOARD_TOP: usize = 5;

pub fn create_user_if_not_exists(users: &mut UsersDocument, address: Address) -> &mut User {
    users.entry(address).or_default()
}

/// Top `top` users by score, plus the requested user's own row when present.
///
/// Ties keep address order, so positions are stable between calls.
pub fn leaderboard(users: &UsersDocument, address: &Address, top: usize) -> Vec<LeaderboardRow> {
    let mut scored: Vec<(Address, u128)> = users.iter().map(|(a, u)| (*a, u.score())).collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    let rows: Vec<LeaderboardRow> = scored
        .into_iter()
        .enumerate()
        .map(|(i, (address, score))| LeaderboardRow { position: i + 1, address, score })
        .collect();

    let mut shown: Vec<LeaderboardRow> = rows.iter().take(top).cloned().collect();
    if let Some(own) = rows.iter().find(|r| &r.address == address) {
        shown.push(own.clone());
    }
    shown
}

pub fn accept_metadata_request(
    users: &mut UsersDocument,
    address: &Address,
    request: &MetadataUpdateRequest,
) -> Result<(), ServiceError> {
    if request.metadata_field == MetadataField::X && x_handle_taken(users, address, &request.value) {
        return Err(ServiceError::Conflict(format!("X account {} is already linked to another address", request.value)));
    }
    let user = users.get_mut(address).ok_or_else(|| ServiceError::not_found("user"))?;
    let Some(pos) = user.metadata_update_requests.iter().position(|r| r == request) else {
        return Err(ServiceError::not_found("pending request"));
    };
    user.metadata_update_requests.remove(pos);
    user.metadata.set(request.metadata_field, request.value.clone());
    // the same request may have been queued more than once
    user.metadata_update_requests.retain(|r| r != request);
    Ok(())
}

/// Whether an address other than `address` already has `username` as its
/// accepted X handle. Handles compare case-insensitively.
fn x_handle_taken(users: &UsersDocument, address: &Address, username: &str) -> bool {
    users
        .iter()
        .any(|(a, u)| a != address && u.metadata.x.as_deref().is_some_and(|x| x.eq_ignore_ascii_case(username)))
}

/// Queue an X handle for `address`, to be confirmed with a signature later.
///
/// Handles are unique across users. The same handle may sit pending on
/// several addresses; uniqueness is enforced again when a pending handle is
/// accepted, and both checks run inside a mutation of the single users
/// document, so two links of one handle to different addresses cannot both
/// be accepted.
pub fn queue_x_link(users: &mut UsersDocument, address: Address, username: &str) -> Result<(), ServiceError> {
    if x_handle_taken(users, &address, username) {
        return Err(ServiceError::Conflict(format!("X account {username} is already linked to another address")));
    }
    let request = MetadataUpdateRequest { metadata_field: MetadataField::X, value: username.to_string() };
    let user = create_user_if_not_exists(users, address);
    if !user.metadata_update_requests.contains(&request) {
        user.metadata_update_requests.push(request);
    }
    Ok(())
}

/// Award a task's points to `address`, once per task.
pub fn complete_task(
    users: &mut UsersDocument,
    tasks: &TasksDocument,
    address: Address,
    task_index: usize,
) -> Result<CompletedTask, ServiceError> {
    let task = tasks.get(task_index).ok_or_else(|| ServiceError::not_found("task"))?;
    let done = users
        .get(&address)
        .is_some_and(|u| u.completed_tasks.iter().any(|t| t.task_index == task_index));
    if done {
        return Err(ServiceError::Conflict(format!("task {task_index} already completed")));
    }
    let completed = CompletedTask { task_index, points: task.points };
    create_user_if_not_exists(users, address).completed_tasks.push(completed);
    Ok(completed)
}

/// Register `address` on the droplist; returns its 1-based slot.
pub fn register_droplist(
    droplist: &mut DroplistDocument,
    address: Address,
    signature: Vec<u8>,
    now: DateTime<Utc>,
) -> Result<usize, ServiceError> {
    if droplist.iter().any(|e| e.address == address) {
        return Err(ServiceError::Conflict(format!("{address} is already on the droplist")));
    }
    droplist.push(DroplistEntry { address, registered_at: now, signature });
    Ok(droplist.len())
}

pub fn droplist_slot(droplist: &DroplistDocument, address: &Address) -> Option<usize> {
    droplist.iter().position(|e| &e.address == address).map(|i| i + 1)
}
