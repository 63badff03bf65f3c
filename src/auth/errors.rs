//! Authentication error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::cookie::clear_session_cookies;
use crate::api::error_response;
use crate::session::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    NotAuthenticated,
    InvalidToken,
    /// Access token past its expiry; the client should renew through the
    /// session endpoint. Cookies are kept so the renewal can use them.
    AccessTokenExpired,
    Session(SessionError),
    AdminRequired,
}

/// API authentication errors (JSON body; clears cookies unless the client can
/// still recover by renewing).
#[derive(Debug)]
pub struct ApiAuthError {
    pub kind: AuthErrorKind,
    secure_cookies: bool,
}

impl ApiAuthError {
    pub fn new(kind: AuthErrorKind, secure_cookies: bool) -> Self {
        Self {
            kind,
            secure_cookies,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self.kind {
            AuthErrorKind::AdminRequired => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    fn code(&self) -> &'static str {
        match self.kind {
            AuthErrorKind::NotAuthenticated | AuthErrorKind::InvalidToken => "UNAUTHORIZED",
            AuthErrorKind::AccessTokenExpired => "ACCESS_TOKEN_EXPIRED",
            AuthErrorKind::Session(e) => e.code(),
            AuthErrorKind::AdminRequired => "ADMIN_REQUIRED",
        }
    }

    fn message(&self) -> &'static str {
        match self.kind {
            AuthErrorKind::NotAuthenticated => "Not authenticated",
            AuthErrorKind::InvalidToken => "Invalid or expired token",
            AuthErrorKind::AccessTokenExpired => "Access token expired",
            AuthErrorKind::Session(e) => e.message(),
            AuthErrorKind::AdminRequired => "Admin role required",
        }
    }

    fn clears_cookies(&self) -> bool {
        matches!(
            self.kind,
            AuthErrorKind::InvalidToken | AuthErrorKind::Session(_)
        )
    }
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        let mut response = error_response(self.status_code(), self.code(), self.message());
        if self.clears_cookies() {
            clear_session_cookies(response.headers_mut(), self.secure_cookies);
        }
        response
    }
}
