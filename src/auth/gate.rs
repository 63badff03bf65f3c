//! Edge request gate.
//!
//! Runs in front of every route. It decodes the access token and checks the
//! presence cookie, nothing more: it never rotates, slides or writes to the
//! store, because it cannot guarantee the resulting cookie reaches the browser.
//! An access token past its expiry is let through; the handler's extractor
//! asks the client to renew.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::debug;

use super::cookie::{ACCESS_COOKIE_NAME, PRESENCE_COOKIE_NAME, clear_session_cookies, get_cookie};
use crate::api::error_response;
use crate::db::UserRole;
use crate::session::{SessionError, SessionManager};

/// Why a request was sent back to the login page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No access token at all
    NoSession,
    /// Access token does not verify
    InvalidToken,
    /// Valid token but the presence cookie is gone (browser was closed)
    BrowserSessionEnded,
    /// Token carries a terminal session error
    Session(SessionError),
}

impl DenyReason {
    /// Query string appended to the login redirect, if any.
    pub fn login_query(&self) -> Option<&'static str> {
        match self {
            DenyReason::NoSession => None,
            DenyReason::InvalidToken => Some("authError=true"),
            DenyReason::BrowserSessionEnded => Some("sessionExpired=true"),
            DenyReason::Session(e) => Some(e.login_query()),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::NoSession | DenyReason::InvalidToken => "UNAUTHORIZED",
            DenyReason::BrowserSessionEnded => "SESSION_EXPIRED",
            DenyReason::Session(e) => e.code(),
        }
    }

    fn clears_cookies(&self) -> bool {
        !matches!(self, DenyReason::NoSession)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    RedirectToLogin(DenyReason),
    RedirectRoleDenied,
}

/// Path classification and the decision procedure.
#[derive(Debug, Clone)]
pub struct EdgeGate {
    public_paths: Vec<String>,
    admin_paths: Vec<String>,
    login_path: String,
}

impl Default for EdgeGate {
    fn default() -> Self {
        Self {
            public_paths: ["/login", "/register", "/api/auth/", "/api/cron/", "/health"]
                .into_iter()
                .map(String::from)
                .collect(),
            admin_paths: ["/admin", "/api/admin"]
                .into_iter()
                .map(String::from)
                .collect(),
            login_path: "/login".to_string(),
        }
    }
}

/// `prefix` matches itself and anything below it. A trailing slash on the
/// prefix is ignored for the exact match.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    let base = prefix.trim_end_matches('/');
    path == base
        || path
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl EdgeGate {
    pub fn with_public_path(mut self, path: impl Into<String>) -> Self {
        self.public_paths.push(path.into());
        self
    }

    pub fn with_admin_path(mut self, path: impl Into<String>) -> Self {
        self.admin_paths.push(path.into());
        self
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| matches_prefix(path, p))
    }

    pub fn is_admin(&self, path: &str) -> bool {
        self.admin_paths.iter().any(|p| matches_prefix(path, p))
    }

    /// Decide what to do with a request from its path and raw cookie values.
    pub fn evaluate(
        &self,
        sessions: &SessionManager,
        path: &str,
        access_cookie: Option<&str>,
        presence_cookie: Option<&str>,
    ) -> GateDecision {
        if self.is_public(path) {
            return GateDecision::Allow;
        }

        let Some(token) = access_cookie else {
            return GateDecision::RedirectToLogin(DenyReason::NoSession);
        };
        let Ok(claims) = sessions.codec().decode(token) else {
            return GateDecision::RedirectToLogin(DenyReason::InvalidToken);
        };
        if let Some(error) = claims.error {
            return GateDecision::RedirectToLogin(DenyReason::Session(error));
        }
        if !sessions.presence().is_present(presence_cookie) {
            return GateDecision::RedirectToLogin(DenyReason::BrowserSessionEnded);
        }

        if self.is_admin(path) && claims.role != UserRole::Admin {
            return GateDecision::RedirectRoleDenied;
        }

        GateDecision::Allow
    }
}

#[derive(Clone)]
pub struct GateState {
    pub sessions: SessionManager,
    pub gate: Arc<EdgeGate>,
    pub secure_cookies: bool,
}

/// Middleware applying [`EdgeGate`] to every request. API paths get JSON
/// errors, pages get redirects.
pub async fn edge_gate(State(state): State<GateState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let decision = state.gate.evaluate(
        &state.sessions,
        &path,
        get_cookie(request.headers(), ACCESS_COOKIE_NAME),
        get_cookie(request.headers(), PRESENCE_COOKIE_NAME),
    );

    let is_api = matches_prefix(&path, "/api");
    match decision {
        GateDecision::Allow => next.run(request).await,
        GateDecision::RedirectToLogin(reason) => {
            debug!(path = %path, reason = ?reason, "Request denied by gate");
            let mut response = if is_api {
                error_response(StatusCode::UNAUTHORIZED, reason.code(), "Authentication required")
            } else {
                let target = match reason.login_query() {
                    Some(query) => format!("{}?{}", state.gate.login_path(), query),
                    None => state.gate.login_path().to_string(),
                };
                Redirect::temporary(&target).into_response()
            };
            if reason.clears_cookies() {
                clear_session_cookies(response.headers_mut(), state.secure_cookies);
            }
            response
        }
        GateDecision::RedirectRoleDenied => {
            debug!(path = %path, "Role denied by gate");
            if is_api {
                error_response(StatusCode::FORBIDDEN, "ADMIN_REQUIRED", "Admin role required")
            } else {
                Redirect::temporary("/").into_response()
            }
        }
    }
}
