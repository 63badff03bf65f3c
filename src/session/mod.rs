//! Session lifecycle: login, sliding renewal, rotation and logout.
//!
//! The manager composes the access token codec, the refresh token store and
//! the presence codec. It never lets a storage error escape from renewal;
//! those become a [`SessionError`] stamped into the claims instead.

mod retry;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::clock::unix_now;
use crate::db::{Database, RotateOutcome, TokenStoreError, User};
use crate::jwt::{AccessClaims, AccessTokenCodec, JwtError};
use crate::presence::{PresenceCodec, PresenceError, PresenceMarker};

pub use retry::RetryPolicy;

/// Client-visible session failure, carried in the access token's `error` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionError {
    /// No usable refresh token remained
    SessionExpired,
    /// A rotated-away refresh token was presented again
    TokenReused,
    /// The user was deleted after the session started
    UserDeleted,
    /// Storage failed while rotating
    RefreshTokenInvalid,
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::SessionExpired => "SESSION_EXPIRED",
            SessionError::TokenReused => "TOKEN_REUSED",
            SessionError::UserDeleted => "USER_DELETED",
            SessionError::RefreshTokenInvalid => "REFRESH_TOKEN_INVALID",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            SessionError::SessionExpired | SessionError::RefreshTokenInvalid => {
                "Session expired, please log in again"
            }
            SessionError::TokenReused => "Session revoked, please log in again",
            SessionError::UserDeleted => "Account no longer exists",
        }
    }

    /// Query parameter appended to the login redirect.
    pub fn login_query(&self) -> &'static str {
        match self {
            SessionError::SessionExpired => "sessionExpired=true",
            _ => "authError=true",
        }
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Whether the caller can deliver new cookies with its response.
///
/// Rotation is only performed with `Yes`. A rotation whose result never reaches
/// the browser leaves the browser holding a rotated-away token, and its next
/// request would be treated as a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanPersist {
    Yes,
    No,
}

/// Session timing. All durations in seconds.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lifetime of an access token (`ate - now` at issue)
    pub access_ttl: u64,
    /// Slide the access token when less than this remains
    pub sliding_threshold: u64,
    /// Lifetime of each refresh token, reset on rotation
    pub refresh_ttl: u64,
    /// Max-Age of the remember-me presence cookie
    pub presence_ttl: u64,
    /// How long rotated/revoked records are kept before cleanup
    pub retention: u64,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_ttl: 30 * 60,
            sliding_threshold: 15 * 60,
            refresh_ttl: 7 * 24 * 60 * 60,
            presence_ttl: 7 * 24 * 60 * 60,
            retention: crate::db::DEFAULT_RETENTION_SECS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Where a renewal ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Valid and not near expiry (or near expiry but not persistable)
    Fresh,
    /// Re-signed with an extended access expiry
    Slid,
    /// Expired, but the caller cannot persist; left untouched
    Deferred,
    /// Refresh token rotated, new access token minted
    Rotated,
    /// Claims already carried an error; left untouched
    Errored(SessionError),
    /// No usable refresh token
    ExpiredTerminal,
    /// Refresh token reuse detected, family revoked
    Compromised,
    /// User deleted since login
    UserRevoked,
    /// Storage unavailable after retries
    Unavailable,
}

impl SessionState {
    /// The client-visible error for terminal states.
    pub fn error(&self) -> Option<SessionError> {
        match self {
            SessionState::Errored(e) => Some(*e),
            SessionState::ExpiredTerminal => Some(SessionError::SessionExpired),
            SessionState::Compromised => Some(SessionError::TokenReused),
            SessionState::UserRevoked => Some(SessionError::UserDeleted),
            SessionState::Unavailable => Some(SessionError::RefreshTokenInvalid),
            SessionState::Fresh
            | SessionState::Slid
            | SessionState::Deferred
            | SessionState::Rotated => None,
        }
    }
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub user: User,
    pub claims: AccessClaims,
    pub token: String,
    pub presence: String,
}

#[derive(Debug)]
pub struct RenewOutcome {
    pub state: SessionState,
    pub claims: AccessClaims,
    /// Set when the access token was re-signed and must be written back
    pub token: Option<String>,
    /// Set when the presence cookie must be written back
    pub presence: Option<String>,
}

/// Internal failures that are not part of the session error surface.
#[derive(Debug)]
pub enum SessionFailure {
    Database(sqlx::Error),
    Store(TokenStoreError),
    Token(JwtError),
    Presence(PresenceError),
}

impl From<sqlx::Error> for SessionFailure {
    fn from(e: sqlx::Error) -> Self {
        SessionFailure::Database(e)
    }
}

impl From<TokenStoreError> for SessionFailure {
    fn from(e: TokenStoreError) -> Self {
        SessionFailure::Store(e)
    }
}

impl From<JwtError> for SessionFailure {
    fn from(e: JwtError) -> Self {
        SessionFailure::Token(e)
    }
}

impl From<PresenceError> for SessionFailure {
    fn from(e: PresenceError) -> Self {
        SessionFailure::Presence(e)
    }
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionFailure::Database(e) => write!(f, "Database error: {}", e),
            SessionFailure::Store(e) => write!(f, "{}", e),
            SessionFailure::Token(e) => write!(f, "{}", e),
            SessionFailure::Presence(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionFailure {}

#[derive(Clone)]
pub struct SessionManager {
    db: Database,
    codec: Arc<AccessTokenCodec>,
    presence: Arc<PresenceCodec>,
    config: Arc<SessionConfig>,
}

impl SessionManager {
    pub fn new(
        db: Database,
        codec: AccessTokenCodec,
        presence: PresenceCodec,
        config: SessionConfig,
    ) -> Self {
        Self {
            db,
            codec: Arc::new(codec),
            presence: Arc::new(presence),
            config: Arc::new(config),
        }
    }

    pub fn codec(&self) -> &AccessTokenCodec {
        &self.codec
    }

    pub fn presence(&self) -> &PresenceCodec {
        &self.presence
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub async fn login(
        &self,
        login_id: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<Option<LoginOutcome>, SessionFailure> {
        self.login_at(login_id, password, remember_me, unix_now())
            .await
    }

    /// Verify credentials and start a session. `None` means bad credentials.
    ///
    /// A refresh token family is created only for remember-me logins.
    pub async fn login_at(
        &self,
        login_id: &str,
        password: &str,
        remember_me: bool,
        now: u64,
    ) -> Result<Option<LoginOutcome>, SessionFailure> {
        let Some(user) = self.db.users().verify_credentials(login_id, password).await? else {
            return Ok(None);
        };

        let refresh_token = if remember_me {
            let store = self.db.refresh_tokens();
            let issued = self
                .config
                .retry
                .run(|| store.create_family(user.id, now, self.config.refresh_ttl))
                .await?;
            debug!(user_id = user.id, family_id = %issued.family_id, "Refresh token family created");
            Some(issued.raw)
        } else {
            None
        };

        let mut claims = AccessClaims::for_user(
            &user,
            remember_me,
            refresh_token,
            now + self.config.access_ttl,
        );
        let token = self.codec.seal(&mut claims, now)?;
        let presence = self.presence.seal(&PresenceMarker::logged_in(remember_me))?;

        info!(user_id = user.id, remember_me, "User logged in");

        Ok(Some(LoginOutcome {
            user,
            claims,
            token,
            presence,
        }))
    }

    pub async fn renew(
        &self,
        claims: AccessClaims,
        persist: CanPersist,
    ) -> Result<RenewOutcome, SessionFailure> {
        self.renew_at(claims, persist, unix_now()).await
    }

    /// Drive the session state machine for one request.
    ///
    /// Errors returned here are signing failures only; storage trouble is
    /// folded into the returned state.
    pub async fn renew_at(
        &self,
        claims: AccessClaims,
        persist: CanPersist,
        now: u64,
    ) -> Result<RenewOutcome, SessionFailure> {
        if let Some(error) = claims.error {
            return Ok(unchanged(SessionState::Errored(error), claims));
        }

        if !claims.is_access_expired(now) {
            if claims.time_remaining(now) >= self.config.sliding_threshold
                || persist == CanPersist::No
            {
                return Ok(unchanged(SessionState::Fresh, claims));
            }
            return self.slide(claims, now);
        }

        if persist == CanPersist::No {
            return Ok(unchanged(SessionState::Deferred, claims));
        }

        let Some(raw) = claims.refresh_token.clone() else {
            debug!(sub = %claims.sub, "Access token expired without refresh token");
            return self.terminate(claims, SessionState::ExpiredTerminal, now);
        };

        let user = match self.db.users().get_by_uuid(&claims.sub).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(sub = %claims.sub, "Session user no longer exists");
                return self.terminate(claims, SessionState::UserRevoked, now);
            }
            Err(e) => {
                error!(sub = %claims.sub, error = %e, "Failed to load session user");
                return self.terminate(claims, SessionState::Unavailable, now);
            }
        };

        if user.is_deleted {
            warn!(user_id = user.id, "Session user deleted, revoking refresh tokens");
            let store = self.db.refresh_tokens();
            let revoked = self
                .config
                .retry
                .run(|| store.revoke_all_for_user(user.id, now))
                .await;
            // Rotation is refused for deleted users whether or not this lands.
            if let Err(e) = revoked {
                error!(user_id = user.id, error = %e, "Failed to revoke tokens of deleted user");
            }
            return self.terminate(claims, SessionState::UserRevoked, now);
        }

        match self.rotate_with_retry(&raw, user.id, now).await {
            Ok(RotateOutcome::Rotated(issued)) => {
                let mut renewed = AccessClaims::for_user(
                    &user,
                    claims.remember_me,
                    Some(issued.raw),
                    now + self.config.access_ttl,
                );
                let token = self.codec.seal(&mut renewed, now)?;
                let presence = self.presence_for(&renewed)?;
                debug!(user_id = user.id, family_id = %issued.family_id, "Refresh token rotated");
                Ok(RenewOutcome {
                    state: SessionState::Rotated,
                    claims: renewed,
                    token: Some(token),
                    presence,
                })
            }
            Ok(RotateOutcome::Reused { family_id, revoked }) => {
                error!(
                    user_id = user.id,
                    family_id = %family_id,
                    revoked,
                    "Refresh token replay, session family burned"
                );
                self.terminate(claims, SessionState::Compromised, now)
            }
            Ok(RotateOutcome::Invalid(reason)) => {
                info!(user_id = user.id, reason = ?reason, "Refresh token rejected");
                self.terminate(claims, SessionState::ExpiredTerminal, now)
            }
            Err(e) => {
                error!(user_id = user.id, error = %e, "Refresh token rotation failed");
                self.terminate(claims, SessionState::Unavailable, now)
            }
        }
    }

    /// Revoke the family of the refresh token carried by `claims`, if any.
    /// Safe to call repeatedly.
    pub async fn logout(&self, claims: Option<&AccessClaims>) -> Result<u64, SessionFailure> {
        self.logout_at(claims, unix_now()).await
    }

    pub async fn logout_at(
        &self,
        claims: Option<&AccessClaims>,
        now: u64,
    ) -> Result<u64, SessionFailure> {
        let Some(raw) = claims.and_then(|c| c.refresh_token.as_deref()) else {
            return Ok(0);
        };

        let store = self.db.refresh_tokens();
        let Some(record) = store.find_by_raw(raw).await? else {
            return Ok(0);
        };

        let revoked = self
            .config
            .retry
            .run(|| store.revoke_family(&record.family_id, now))
            .await?;
        info!(user_id = record.user_id, family_id = %record.family_id, revoked, "User logged out");
        Ok(revoked)
    }

    /// Revoke every refresh token of a user.
    pub async fn logout_all(&self, user_id: i64) -> Result<u64, SessionFailure> {
        let store = self.db.refresh_tokens();
        let now = unix_now();
        let revoked = self
            .config
            .retry
            .run(|| store.revoke_all_for_user(user_id, now))
            .await?;
        info!(user_id, revoked, "All sessions revoked");
        Ok(revoked)
    }

    fn slide(&self, mut claims: AccessClaims, now: u64) -> Result<RenewOutcome, SessionFailure> {
        claims.access_expires = now + self.config.access_ttl;
        let token = self.codec.seal(&mut claims, now)?;
        let presence = self.presence_for(&claims)?;
        Ok(RenewOutcome {
            state: SessionState::Slid,
            claims,
            token: Some(token),
            presence,
        })
    }

    fn terminate(
        &self,
        mut claims: AccessClaims,
        state: SessionState,
        now: u64,
    ) -> Result<RenewOutcome, SessionFailure> {
        claims.refresh_token = None;
        claims.error = state.error();
        let token = self.codec.seal(&mut claims, now)?;
        Ok(RenewOutcome {
            state,
            claims,
            token: Some(token),
            presence: None,
        })
    }

    /// Remember-me sessions get a fresh presence cookie whenever the access
    /// token is reissued; browser-session ones keep theirs.
    fn presence_for(&self, claims: &AccessClaims) -> Result<Option<String>, SessionFailure> {
        if !claims.remember_me {
            return Ok(None);
        }
        Ok(Some(self.presence.seal(&PresenceMarker::logged_in(true))?))
    }

    async fn rotate_with_retry(
        &self,
        raw: &str,
        user_id: i64,
        now: u64,
    ) -> Result<RotateOutcome, TokenStoreError> {
        let store = self.db.refresh_tokens();
        self.config
            .retry
            .run(|| store.rotate(raw, user_id, now, self.config.refresh_ttl))
            .await
    }
}

fn unchanged(state: SessionState, claims: AccessClaims) -> RenewOutcome {
    RenewOutcome {
        state,
        claims,
        token: None,
        presence: None,
    }
}

impl RenewOutcome {
    pub fn error(&self) -> Option<SessionError> {
        self.state.error()
    }
}
