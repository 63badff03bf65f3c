//! Session API endpoints.
//!
//! - POST `/login` - Verify credentials and start a session
//! - GET `/session` - Current user; the only place a session is renewed
//! - POST `/logout` - Revoke this session's refresh token family
//! - POST `/logout-all` - Revoke every refresh token of the current user

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::error::{ApiError, ResultExt, error_response};
use crate::auth::{
    ACCESS_COOKIE_NAME, ApiAuthError, Auth, AuthErrorKind, MaybeClaims, PRESENCE_COOKIE_NAME,
    append_set_cookie, build_cookie, clear_session_cookies, get_cookie,
};
use crate::db::UserRole;
use crate::impl_has_auth_backend;
use crate::jwt::AccessClaims;
use crate::rate_limit::{RateLimitConfig, rate_limit_login};
use crate::session::{CanPersist, SessionError, SessionManager};

#[derive(Clone)]
pub struct AuthState {
    pub sessions: SessionManager,
    pub secure_cookies: bool,
}

impl_has_auth_backend!(AuthState);

pub fn router(state: AuthState, rate_limit: Arc<RateLimitConfig>) -> Router {
    let login_routes = Router::new()
        .route("/login", post(login))
        .route_layer(middleware::from_fn_with_state(rate_limit, rate_limit_login));

    Router::new()
        .merge(login_routes)
        .route("/session", get(session))
        .route("/logout", post(logout))
        .route("/logout-all", post(logout_all))
        .with_state(state)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    login_id: String,
    password: String,
    #[serde(default)]
    remember_me: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionUser {
    id: String,
    name: String,
    login_id: String,
    role: UserRole,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    user: SessionUser,
    access_token_expires: u64,
}

impl SessionResponse {
    fn from_claims(claims: &AccessClaims) -> Self {
        Self {
            user: SessionUser {
                id: claims.sub.clone(),
                name: claims.name.clone(),
                login_id: claims.login_id.clone(),
                role: claims.role,
            },
            access_token_expires: claims.access_expires,
        }
    }
}

/// Set-Cookie headers for a (re)issued session. Remember-me sessions get
/// persistent cookies; the others last until the browser closes.
fn session_cookie_headers(
    headers: &mut HeaderMap,
    state: &AuthState,
    remember_me: bool,
    token: Option<&str>,
    presence: Option<&str>,
) {
    let sessions = &state.sessions;
    if let Some(token) = token {
        let max_age = remember_me.then(|| sessions.codec().max_age());
        append_set_cookie(
            headers,
            &build_cookie(ACCESS_COOKIE_NAME, token, max_age, state.secure_cookies),
        );
    }
    if let Some(presence) = presence {
        let max_age = remember_me.then(|| sessions.config().presence_ttl);
        append_set_cookie(
            headers,
            &build_cookie(PRESENCE_COOKIE_NAME, presence, max_age, state.secure_cookies),
        );
    }
}

async fn login(
    State(state): State<AuthState>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let login_id = request.login_id.trim();
    if login_id.is_empty() || request.password.is_empty() {
        return Err(ApiError::validation("Login id and password are required"));
    }

    let outcome = state
        .sessions
        .login(login_id, &request.password, request.remember_me)
        .await
        .db_err("Failed to log in")?
        .ok_or(ApiError::InvalidCredentials)?;

    let mut headers = HeaderMap::new();
    session_cookie_headers(
        &mut headers,
        &state,
        request.remember_me,
        Some(&outcome.token),
        Some(&outcome.presence),
    );

    Ok((
        StatusCode::OK,
        headers,
        Json(SessionResponse::from_claims(&outcome.claims)),
    ))
}

/// Current session. Renews it when due, with cookies written back.
async fn session(
    State(state): State<AuthState>,
    MaybeClaims(claims): MaybeClaims,
    request_headers: HeaderMap,
) -> Result<Response, ApiAuthError> {
    let secure = state.secure_cookies;
    let has_cookie = get_cookie(&request_headers, ACCESS_COOKIE_NAME).is_some();

    let Some(claims) = claims else {
        let kind = if has_cookie {
            AuthErrorKind::InvalidToken
        } else {
            AuthErrorKind::NotAuthenticated
        };
        return Err(ApiAuthError::new(kind, secure));
    };

    if claims.error.is_none()
        && !state
            .sessions
            .presence()
            .is_present(get_cookie(&request_headers, PRESENCE_COOKIE_NAME))
    {
        return Err(ApiAuthError::new(
            AuthErrorKind::Session(SessionError::SessionExpired),
            secure,
        ));
    }

    let remember_me = claims.remember_me;
    let outcome = match state.sessions.renew(claims, CanPersist::Yes).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "Failed to renew session");
            return Err(ApiAuthError::new(
                AuthErrorKind::Session(SessionError::RefreshTokenInvalid),
                secure,
            ));
        }
    };

    if let Some(error) = outcome.error() {
        return Err(ApiAuthError::new(AuthErrorKind::Session(error), secure));
    }

    let mut headers = HeaderMap::new();
    session_cookie_headers(
        &mut headers,
        &state,
        remember_me,
        outcome.token.as_deref(),
        outcome.presence.as_deref(),
    );

    Ok((
        StatusCode::OK,
        headers,
        Json(SessionResponse::from_claims(&outcome.claims)),
    )
        .into_response())
}

/// Logout. Always clears cookies; reports 500 if the family could not be revoked.
async fn logout(
    State(state): State<AuthState>,
    MaybeClaims(claims): MaybeClaims,
) -> Response {
    let mut response = match state.sessions.logout(claims.as_ref()).await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "success": true }))).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to revoke session on logout");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Failed to revoke session",
            )
        }
    };

    clear_session_cookies(response.headers_mut(), state.secure_cookies);
    response
}

#[derive(Serialize)]
struct LogoutAllResponse {
    revoked: u64,
}

async fn logout_all(
    State(state): State<AuthState>,
    auth: Auth,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .sessions
        .db()
        .users()
        .get_by_uuid(auth.user.uuid())
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;

    let revoked = state
        .sessions
        .logout_all(user.id)
        .await
        .db_err("Failed to revoke sessions")?;

    let mut headers = HeaderMap::new();
    clear_session_cookies(&mut headers, state.secure_cookies);
    Ok((StatusCode::OK, headers, Json(LogoutAllResponse { revoked })))
}
