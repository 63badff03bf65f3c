//! Session-presence marker.
//!
//! A small encrypted cookie that exists for as long as the browser session is
//! open (or for a fixed number of days with remember-me). The gate only cares
//! whether it is present and decrypts; the payload is informational.
//!
//! Wire format: base64url(nonce || ciphertext || tag), AES-256-GCM, key =
//! SHA-256 of the session secret.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use openssl::symm::{Cipher, decrypt_aead, encrypt_aead};
use rand::RngCore;
use serde::{Deserialize, Serialize};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMarker {
    pub is_logged_in: bool,
    pub remember_me: bool,
}

impl PresenceMarker {
    pub fn logged_in(remember_me: bool) -> Self {
        Self {
            is_logged_in: true,
            remember_me,
        }
    }
}

#[derive(Clone)]
pub struct PresenceCodec {
    key: [u8; 32],
}

impl PresenceCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: openssl::sha::sha256(secret),
        }
    }

    pub fn seal(&self, marker: &PresenceMarker) -> Result<String, PresenceError> {
        let plaintext = serde_json::to_vec(marker).map_err(PresenceError::Payload)?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let mut tag = [0u8; TAG_LEN];
        let ciphertext = encrypt_aead(
            Cipher::aes_256_gcm(),
            &self.key,
            Some(&nonce),
            &[],
            &plaintext,
            &mut tag,
        )
        .map_err(PresenceError::Crypto)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&tag);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Decrypt and authenticate a cookie value.
    pub fn open(&self, value: &str) -> Result<PresenceMarker, PresenceError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| PresenceError::Malformed)?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(PresenceError::Malformed);
        }

        let (nonce, rest) = bytes.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

        let plaintext = decrypt_aead(
            Cipher::aes_256_gcm(),
            &self.key,
            Some(nonce),
            &[],
            ciphertext,
            tag,
        )
        .map_err(PresenceError::Crypto)?;

        serde_json::from_slice(&plaintext).map_err(PresenceError::Payload)
    }

    /// True when the cookie decrypts to a logged-in marker.
    pub fn is_present(&self, value: Option<&str>) -> bool {
        value
            .and_then(|v| self.open(v).ok())
            .is_some_and(|m| m.is_logged_in)
    }
}

#[derive(Debug)]
pub enum PresenceError {
    Malformed,
    Crypto(openssl::error::ErrorStack),
    Payload(serde_json::Error),
}

impl std::fmt::Display for PresenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresenceError::Malformed => write!(f, "Malformed presence cookie"),
            PresenceError::Crypto(e) => write!(f, "Presence cookie crypto failed: {}", e),
            PresenceError::Payload(e) => write!(f, "Presence cookie payload invalid: {}", e),
        }
    }
}

impl std::error::Error for PresenceError {}
