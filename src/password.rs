//! PBKDF2-HMAC-SHA256 password hashing.
//!
//! Stored format: `pbkdf2-sha256$<iterations>$<salt b64url>$<hash b64url>`.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use openssl::hash::MessageDigest;
use rand::RngCore;

const SCHEME: &str = "pbkdf2-sha256";
const ITERATIONS: usize = 210_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Well-formed hash at full cost that no password matches. Verified against
/// when a login id is unknown so the miss costs as much as a wrong password.
pub const DUMMY_HASH: &str = "pbkdf2-sha256$210000$AAAAAAAAAAAAAAAAAAAAAA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);

    let hash = derive(password, &salt, ITERATIONS)?;

    Ok(format!(
        "{}${}${}${}",
        SCHEME,
        ITERATIONS,
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(hash)
    ))
}

/// Check a password against a stored hash in constant time.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, PasswordError> {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(PasswordError::Malformed);
    };

    if scheme != SCHEME {
        return Err(PasswordError::Malformed);
    }

    let iterations: usize = iterations.parse().map_err(|_| PasswordError::Malformed)?;
    let salt = URL_SAFE_NO_PAD
        .decode(salt)
        .map_err(|_| PasswordError::Malformed)?;
    let expected = URL_SAFE_NO_PAD
        .decode(expected)
        .map_err(|_| PasswordError::Malformed)?;

    if expected.len() != HASH_LEN || iterations == 0 {
        return Err(PasswordError::Malformed);
    }

    let actual = derive(password, &salt, iterations)?;
    Ok(openssl::memcmp::eq(&actual, &expected))
}

/// [`hash_password`] on the blocking thread pool.
pub async fn hash_password_async(password: String) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(PasswordError::Join)?
}

/// [`verify_password`] on the blocking thread pool.
pub async fn verify_password_async(password: String, stored: String) -> Result<bool, PasswordError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(PasswordError::Join)?
}

fn derive(password: &str, salt: &[u8], iterations: usize) -> Result<[u8; HASH_LEN], PasswordError> {
    let mut out = [0u8; HASH_LEN];
    openssl::pkcs5::pbkdf2_hmac(
        password.as_bytes(),
        salt,
        iterations,
        MessageDigest::sha256(),
        &mut out,
    )
    .map_err(PasswordError::Crypto)?;
    Ok(out)
}

#[derive(Debug)]
pub enum PasswordError {
    /// Stored hash is not in the expected format
    Malformed,
    /// OpenSSL failure
    Crypto(openssl::error::ErrorStack),
    /// The blocking task panicked or was cancelled
    Join(tokio::task::JoinError),
}

impl std::fmt::Display for PasswordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordError::Malformed => write!(f, "Malformed password hash"),
            PasswordError::Crypto(e) => write!(f, "Password hashing failed: {}", e),
            PasswordError::Join(e) => write!(f, "Password hashing task failed: {}", e),
        }
    }
}

impl std::error::Error for PasswordError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("pbkdf2-sha256$"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash() {
        assert!(matches!(
            verify_password("x", "not-a-hash"),
            Err(PasswordError::Malformed)
        ));
        assert!(matches!(
            verify_password("x", "bcrypt$1$aa$bb"),
            Err(PasswordError::Malformed)
        ));
    }

    #[test]
    fn test_dummy_hash_matches_nothing() {
        assert!(!verify_password("", DUMMY_HASH).unwrap());
        assert!(!verify_password("correct horse", DUMMY_HASH).unwrap());
        assert!(DUMMY_HASH.contains(&format!("${}$", ITERATIONS)));
    }

    #[tokio::test]
    async fn test_async_round_trip() {
        let hash = hash_password_async("correct horse".to_string()).await.unwrap();
        assert!(verify_password_async("correct horse".to_string(), hash.clone()).await.unwrap());
        assert!(!verify_password_async("wrong horse".to_string(), hash).await.unwrap());
    }
}
