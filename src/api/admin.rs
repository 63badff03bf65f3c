//! Admin session controls.
//!
//! All endpoints require admin role.
//!
//! - GET `/users/{uuid}/sessions` - List a user's live sessions
//! - POST `/users/{uuid}/revoke-sessions` - Revoke all of a user's refresh tokens
//! - DELETE `/users/{uuid}` - Soft-delete a user and revoke their sessions

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::Serialize;
use tracing::info;

use super::error::{ApiError, ResultExt, validate_uuid};
use crate::auth::{AdminOnly, Auth};
use crate::clock::{to_iso8601, unix_now};
use crate::db::User;
use crate::impl_has_auth_backend;
use crate::session::SessionManager;

/// State for admin endpoints.
#[derive(Clone)]
pub struct AdminState {
    pub sessions: SessionManager,
    pub secure_cookies: bool,
}

impl_has_auth_backend!(AdminState);

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/users/{uuid}", delete(delete_user))
        .route("/users/{uuid}/sessions", get(list_sessions))
        .route("/users/{uuid}/revoke-sessions", post(revoke_sessions))
        .with_state(state)
}

async fn find_user(state: &AdminState, uuid: &str) -> Result<User, ApiError> {
    validate_uuid(uuid)?;
    state
        .sessions
        .db()
        .users()
        .get_by_uuid(uuid)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    id: String,
    family_id: String,
    created_at: String,
    expires_at: String,
}

#[derive(Serialize)]
struct ListSessionsResponse {
    sessions: Vec<SessionInfo>,
}

async fn list_sessions(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = find_user(&state, &uuid).await?;

    let records = state
        .sessions
        .db()
        .refresh_tokens()
        .list_active_by_user(user.id, unix_now())
        .await
        .db_err("Failed to list sessions")?;

    let sessions = records
        .into_iter()
        .map(|r| SessionInfo {
            id: r.id,
            family_id: r.family_id,
            created_at: to_iso8601(r.created_at),
            expires_at: to_iso8601(r.expires_at),
        })
        .collect();

    Ok(Json(ListSessionsResponse { sessions }))
}

#[derive(Serialize)]
struct RevokeResponse {
    revoked: u64,
}

async fn revoke_sessions(
    State(state): State<AdminState>,
    auth: Auth<AdminOnly>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = find_user(&state, &uuid).await?;

    let revoked = state
        .sessions
        .logout_all(user.id)
        .await
        .db_err("Failed to revoke sessions")?;
    info!(admin = %auth.user.uuid(), user_id = user.id, revoked, "Admin revoked user sessions");

    Ok(Json(RevokeResponse { revoked }))
}

#[derive(Serialize)]
struct DeleteUserResponse {
    deleted: bool,
    revoked: u64,
}

async fn delete_user(
    State(state): State<AdminState>,
    auth: Auth<AdminOnly>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if auth.user.uuid() == uuid {
        return Err(ApiError::forbidden("Cannot delete your own account"));
    }
    let user = find_user(&state, &uuid).await?;

    let deleted = state
        .sessions
        .db()
        .users()
        .mark_deleted(user.id)
        .await
        .db_err("Failed to delete user")?;
    let revoked = state
        .sessions
        .logout_all(user.id)
        .await
        .db_err("Failed to revoke sessions")?;
    info!(admin = %auth.user.uuid(), user_id = user.id, revoked, "Admin deleted user");

    Ok(Json(DeleteUserResponse { deleted, revoked }))
}
