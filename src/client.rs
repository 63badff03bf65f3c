//! Client-side refresh coordination.
//!
//! A [`RefreshMutex`] is owned by whatever issues API calls on behalf of one
//! browser session (one per tab in a browser, one per client object here).
//! When many calls notice at once that the access token is about to expire,
//! exactly one of them calls the session endpoint and the rest wait for and
//! share its result.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::unix_now;

/// Refresh this many seconds before the access token actually expires.
pub const DEFAULT_REFRESH_BUFFER_SECS: u64 = 30;

const UNKNOWN_EXPIRY: u64 = 0;

/// What the session endpoint reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub access_token_expires: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionBody {
    access_token_expires: Option<u64>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
}

impl SessionSnapshot {
    /// Interpret a session endpoint reply. Error bodies only contribute their
    /// code; a success body that does not parse is a [`ClientError::Decode`].
    pub fn from_response(status: u16, body: &[u8]) -> Result<Self, ClientError> {
        if !(200..300).contains(&status) {
            let code = serde_json::from_slice::<ErrorBody>(body)
                .ok()
                .map(|b| b.error.code);
            return Err(ClientError::Status { status, code });
        }

        let body: SessionBody =
            serde_json::from_slice(body).map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(Self {
            access_token_expires: body.access_token_expires,
        })
    }
}

#[derive(Debug)]
pub enum ClientError {
    /// Non-success HTTP status, with the error code from the body if any
    Status { status: u16, code: Option<String> },
    Transport(String),
    Decode(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Status { status, code } => match code {
                Some(code) => write!(f, "Session endpoint returned {} ({})", status, code),
                None => write!(f, "Session endpoint returned {}", status),
            },
            ClientError::Transport(e) => write!(f, "Session request failed: {}", e),
            ClientError::Decode(e) => write!(f, "Session response invalid: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

/// The renewal call (`GET /api/auth/session`), abstracted over transport.
pub trait SessionEndpoint: Send + Sync {
    fn fetch_session(&self) -> BoxFuture<'_, Result<SessionSnapshot, ClientError>>;
}

struct RefreshState {
    /// Result of the most recent refresh
    last_result: bool,
}

pub struct RefreshMutex<E> {
    endpoint: E,
    buffer: u64,
    expires: AtomicU64,
    /// Completed refreshes; a waiter that sees this move knows its refresh
    /// was already done by someone else.
    generation: AtomicU64,
    refresh: Mutex<RefreshState>,
}

impl<E: SessionEndpoint> RefreshMutex<E> {
    pub fn new(endpoint: E) -> Self {
        Self::with_buffer(endpoint, DEFAULT_REFRESH_BUFFER_SECS)
    }

    pub fn with_buffer(endpoint: E, buffer: u64) -> Self {
        Self {
            endpoint,
            buffer,
            expires: AtomicU64::new(UNKNOWN_EXPIRY),
            generation: AtomicU64::new(0),
            refresh: Mutex::new(RefreshState { last_result: false }),
        }
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    /// Record the access token expiry, e.g. from a login response.
    pub fn update_expiry(&self, expires_at: Option<u64>) {
        self.expires
            .store(expires_at.unwrap_or(UNKNOWN_EXPIRY), Ordering::SeqCst);
    }

    pub fn expiry(&self) -> Option<u64> {
        match self.expires.load(Ordering::SeqCst) {
            UNKNOWN_EXPIRY => None,
            at => Some(at),
        }
    }

    /// True when the expiry is unknown or within the buffer of `now`.
    pub fn needs_refresh(&self, now: u64) -> bool {
        match self.expiry() {
            None => true,
            Some(at) => now + self.buffer >= at,
        }
    }

    /// Make sure the access token is usable, refreshing at most once across
    /// all concurrent callers. Returns false if the session is gone.
    pub async fn ensure_valid_token(&self) -> bool {
        let seen = self.generation.load(Ordering::SeqCst);
        if !self.needs_refresh(unix_now()) {
            return true;
        }
        self.refresh_after(seen, true).await
    }

    /// Refresh regardless of the tracked expiry. Joins a refresh already in
    /// flight instead of starting a second one.
    pub async fn force_refresh(&self) -> bool {
        let seen = self.generation.load(Ordering::SeqCst);
        self.refresh_after(seen, false).await
    }

    async fn refresh_after(&self, seen: u64, recheck_expiry: bool) -> bool {
        let mut state = self.refresh.lock().await;

        if self.generation.load(Ordering::SeqCst) != seen {
            return state.last_result;
        }
        if recheck_expiry && !self.needs_refresh(unix_now()) {
            return true;
        }

        let ok = match self.endpoint.fetch_session().await {
            Ok(snapshot) => {
                if snapshot.access_token_expires.is_some() {
                    self.update_expiry(snapshot.access_token_expires);
                }
                true
            }
            Err(e) => {
                debug!(error = %e, "Session refresh failed");
                false
            }
        };

        state.last_result = ok;
        self.generation.fetch_add(1, Ordering::SeqCst);
        ok
    }
}
