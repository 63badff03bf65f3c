//! Axum extractors for authentication.
//!
//! All extractors here are read-only: they decode the access token and never
//! rotate or slide it. Renewal happens only in the session endpoint.

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::cookie::{ACCESS_COOKIE_NAME, get_cookie};
use super::errors::{ApiAuthError, AuthErrorKind};
use super::state::HasAuthBackend;
use super::types::AuthenticatedUser;
use crate::clock::unix_now;
use crate::db::UserRole;
use crate::jwt::AccessClaims;

/// Role requirement checked by [`Auth`].
pub trait RoleConstraint: Send + Sync {
    fn allows(role: UserRole) -> bool;
}

/// Any authenticated user.
pub struct AnyRole;

impl RoleConstraint for AnyRole {
    fn allows(_role: UserRole) -> bool {
        true
    }
}

/// Admins only.
pub struct AdminOnly;

impl RoleConstraint for AdminOnly {
    fn allows(role: UserRole) -> bool {
        role == UserRole::Admin
    }
}

/// Decode the access token cookie, whatever its state.
fn decode_cookie<S: HasAuthBackend>(parts: &Parts, state: &S) -> Result<AccessClaims, AuthErrorKind> {
    let token =
        get_cookie(&parts.headers, ACCESS_COOKIE_NAME).ok_or(AuthErrorKind::NotAuthenticated)?;
    state
        .sessions()
        .codec()
        .decode(token)
        .map_err(|_| AuthErrorKind::InvalidToken)
}

fn authenticate<S: HasAuthBackend>(
    parts: &Parts,
    state: &S,
    now: u64,
) -> Result<AuthenticatedUser, AuthErrorKind> {
    let claims = decode_cookie(parts, state)?;

    if let Some(error) = claims.error {
        return Err(AuthErrorKind::Session(error));
    }
    if claims.is_access_expired(now) {
        return Err(AuthErrorKind::AccessTokenExpired);
    }

    Ok(AuthenticatedUser { claims })
}

/// Extractor for API endpoints that require a valid, unexpired access token.
pub struct Auth<R: RoleConstraint = AnyRole> {
    pub user: AuthenticatedUser,
    role: PhantomData<R>,
}

impl<S, R> FromRequestParts<S> for Auth<R>
where
    S: HasAuthBackend + Send + Sync,
    R: RoleConstraint,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let secure = state.secure_cookies();
        let user = authenticate(parts, state, unix_now())
            .map_err(|kind| ApiAuthError::new(kind, secure))?;

        if !R::allows(user.claims.role) {
            return Err(ApiAuthError::new(AuthErrorKind::AdminRequired, secure));
        }

        Ok(Auth {
            user,
            role: PhantomData,
        })
    }
}

/// Claims of any token that still verifies, even if past its access expiry or
/// carrying an error. Never fails. Used where a stale session must still be
/// identified, such as logout.
pub struct MaybeClaims(pub Option<AccessClaims>);

impl<S> FromRequestParts<S> for MaybeClaims
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeClaims(decode_cookie(parts, state).ok()))
    }
}
