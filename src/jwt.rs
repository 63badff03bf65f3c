//! Access token codec.
//!
//! The access token is a self-contained HS256 JWT. Two expiries live in it:
//! - `exp`: the envelope lifetime, enforced by signature validation. A token past
//!   `exp` does not decode at all.
//! - `ate`: the access-token expiry the session state machine works with. A token
//!   past `ate` still decodes so its refresh token can be rotated.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::{User, UserRole};
use crate::session::SessionError;

/// Default envelope lifetime: 7 days, matching the refresh token lifetime.
pub const DEFAULT_TOKEN_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Claims carried by the access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user UUID)
    pub sub: String,
    /// Login id
    #[serde(rename = "lid")]
    pub login_id: String,
    /// Display name
    pub name: String,
    /// User role at the time the token was minted
    pub role: UserRole,
    /// Whether the session survives browser restarts
    #[serde(rename = "rem")]
    pub remember_me: bool,
    /// Raw refresh token, only present for remember-me sessions
    #[serde(rename = "rt", default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access token expiry (Unix timestamp)
    #[serde(rename = "ate")]
    pub access_expires: u64,
    /// Terminal session error, set when renewal failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Envelope expiration (Unix timestamp)
    pub exp: u64,
}

impl AccessClaims {
    /// Build claims for a user. `iat`/`exp` are stamped when the token is sealed.
    pub fn for_user(
        user: &User,
        remember_me: bool,
        refresh_token: Option<String>,
        access_expires: u64,
    ) -> Self {
        Self {
            sub: user.uuid.clone(),
            login_id: user.login_id.clone(),
            name: user.name.clone(),
            role: user.role,
            remember_me,
            refresh_token,
            access_expires,
            error: None,
            iat: 0,
            exp: 0,
        }
    }

    pub fn is_access_expired(&self, now: u64) -> bool {
        now >= self.access_expires
    }

    /// Seconds left before the access token expires (0 once expired).
    pub fn time_remaining(&self, now: u64) -> u64 {
        self.access_expires.saturating_sub(now)
    }
}

/// Signs and verifies access tokens.
#[derive(Clone)]
pub struct AccessTokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    max_age: u64,
}

impl AccessTokenCodec {
    /// Create a codec with the given secret and the default envelope lifetime.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            max_age: DEFAULT_TOKEN_MAX_AGE_SECS,
        }
    }

    pub fn with_max_age(mut self, max_age: u64) -> Self {
        self.max_age = max_age;
        self
    }

    /// Envelope lifetime in seconds.
    pub fn max_age(&self) -> u64 {
        self.max_age
    }

    /// Stamp `iat`/`exp` relative to `now` and sign.
    pub fn seal(&self, claims: &mut AccessClaims, now: u64) -> Result<String, JwtError> {
        claims.iat = now;
        claims.exp = now + self.max_age;
        self.issue(claims)
    }

    /// Sign the claims exactly as given.
    pub fn issue(&self, claims: &AccessClaims) -> Result<String, JwtError> {
        jsonwebtoken::encode(&Header::default(), claims, &self.encoding_key)
            .map_err(JwtError::Encoding)
    }

    /// Verify the signature and envelope expiry, then return the claims.
    /// Does not look at `ate`; callers decide what an expired access token means.
    pub fn decode(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let token_data = jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map_err(JwtError::Decoding)?;

        Ok(token_data.claims)
    }
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Error decoding the token (bad structure, bad signature or expired envelope)
    Decoding(jsonwebtoken::errors::Error),
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::Decoding(e) => write!(f, "Failed to decode token: {}", e),
        }
    }
}

impl std::error::Error for JwtError {}
