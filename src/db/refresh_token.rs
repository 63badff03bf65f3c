//! Refresh token storage: issuance, rotation with reuse detection, revocation
//! and cleanup.
//!
//! Only a SHA-256 digest of each raw token is stored. Tokens that are rotated
//! away or revoked stay in the table until cleanup so that presenting one again
//! is recognised as reuse rather than "not found".
//!
//! Every record belongs to a family (one login event and all its rotations).
//! At most one record per family is active; a partial unique index enforces it.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sqlx::sqlite::SqlitePool;
use tracing::error;

/// Revoked records are kept this long for reuse forensics before cleanup.
pub const DEFAULT_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;

const RAW_TOKEN_BYTES: usize = 32;

/// Lifecycle state of a refresh token record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// The current token of its family
    Active,
    /// Exchanged for a successor at `at`
    Rotated { at: u64 },
    /// Revoked by logout or family burn at `at`
    Revoked { at: u64 },
}

impl TokenStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TokenStatus::Active)
    }

    pub fn revoked_at(&self) -> Option<u64> {
        match self {
            TokenStatus::Active => None,
            TokenStatus::Rotated { at } | TokenStatus::Revoked { at } => Some(*at),
        }
    }

    fn from_row(state: &str, revoked_at: Option<i64>) -> Self {
        match (state, revoked_at) {
            ("active", None) => TokenStatus::Active,
            ("rotated", Some(at)) => TokenStatus::Rotated { at: at as u64 },
            // The CHECK constraint rules out anything else; fail closed if it appears.
            (_, at) => TokenStatus::Revoked {
                at: at.unwrap_or_default() as u64,
            },
        }
    }
}

/// A stored refresh token. The raw token value is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub token_hash: String,
    pub user_id: i64,
    pub family_id: String,
    pub status: TokenStatus,
    pub created_at: u64,
    pub expires_at: u64,
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: String,
    token_hash: String,
    user_id: i64,
    family_id: String,
    state: String,
    created_at: i64,
    expires_at: i64,
    revoked_at: Option<i64>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            status: TokenStatus::from_row(&row.state, row.revoked_at),
            id: row.id,
            token_hash: row.token_hash,
            user_id: row.user_id,
            family_id: row.family_id,
            created_at: row.created_at as u64,
            expires_at: row.expires_at as u64,
        }
    }
}

const TOKEN_COLUMNS: &str =
    "id, token_hash, user_id, family_id, state, created_at, expires_at, revoked_at";

/// A freshly issued refresh token. `raw` goes to the client and nowhere else.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub raw: String,
    pub family_id: String,
    pub expires_at: u64,
}

/// Why a rotation attempt was refused without touching the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    NotFound,
    OwnerMismatch,
    Expired,
}

/// Result of [`RefreshTokenStore::rotate`].
#[derive(Debug, Clone)]
pub enum RotateOutcome {
    /// The old token was consumed; `token` replaces it in the same family.
    Rotated(IssuedToken),
    /// The token had already been rotated away or revoked. Every token of the
    /// family is now revoked.
    Reused { family_id: String, revoked: u64 },
    /// Unknown, foreign or expired token. Nothing was changed.
    Invalid(InvalidReason),
}

#[derive(Debug)]
pub enum TokenStoreError {
    /// Another transaction holds the write lock. Safe to retry.
    Contended,
    Database(sqlx::Error),
}

impl From<sqlx::Error> for TokenStoreError {
    fn from(e: sqlx::Error) -> Self {
        if is_lock_error(&e) {
            TokenStoreError::Contended
        } else {
            TokenStoreError::Database(e)
        }
    }
}

impl std::fmt::Display for TokenStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenStoreError::Contended => write!(f, "Refresh token store is locked"),
            TokenStoreError::Database(e) => write!(f, "Refresh token store error: {}", e),
        }
    }
}

impl std::error::Error for TokenStoreError {}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes.
fn is_lock_error(e: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = e else {
        return false;
    };
    db_err
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

/// Generate a new raw refresh token (32 random bytes, base64url).
pub fn generate_raw_token() -> String {
    let mut bytes = [0u8; RAW_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// One-way hash of a raw token as stored in the database.
pub fn hash_token(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(openssl::sha::sha256(raw.as_bytes()))
}

/// Store for refresh token records. All timestamps are passed in by the caller.
#[derive(Clone)]
pub struct RefreshTokenStore {
    pool: SqlitePool,
    /// Zero busy timeout; only [`RefreshTokenStore::rotate`] uses it.
    rotation_pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool, rotation_pool: SqlitePool) -> Self {
        Self {
            pool,
            rotation_pool,
        }
    }

    /// Start a new family for a login and insert its first token.
    pub async fn create_family(
        &self,
        user_id: i64,
        now: u64,
        ttl: u64,
    ) -> Result<IssuedToken, TokenStoreError> {
        let family_id = uuid::Uuid::new_v4().to_string();
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let issued = insert_token(&mut tx, user_id, &family_id, now, ttl).await?;
        tx.commit().await?;
        Ok(issued)
    }

    /// Exchange `raw` for a new token in the same family.
    ///
    /// Runs in one `BEGIN IMMEDIATE` transaction on the zero busy timeout pool.
    /// A competing writer makes this fail fast with [`TokenStoreError::Contended`]
    /// instead of queueing, so two rotations of one token can never both commit.
    pub async fn rotate(
        &self,
        raw: &str,
        expected_user_id: i64,
        now: u64,
        ttl: u64,
    ) -> Result<RotateOutcome, TokenStoreError> {
        let token_hash = hash_token(raw);
        let mut tx = self.rotation_pool.begin_with("BEGIN IMMEDIATE").await?;

        let row: Option<RefreshTokenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM refresh_tokens WHERE token_hash = ?",
            TOKEN_COLUMNS
        ))
        .bind(&token_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(record) = row.map(RefreshTokenRecord::from) else {
            tx.rollback().await?;
            return Ok(RotateOutcome::Invalid(InvalidReason::NotFound));
        };

        if record.user_id != expected_user_id {
            tx.rollback().await?;
            return Ok(RotateOutcome::Invalid(InvalidReason::OwnerMismatch));
        }

        if !record.status.is_active() {
            let revoked = sqlx::query(
                "UPDATE refresh_tokens SET state = 'revoked', revoked_at = ? WHERE family_id = ? AND state = 'active'",
            )
            .bind(now as i64)
            .bind(&record.family_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            tx.commit().await?;

            error!(
                user_id = record.user_id,
                family_id = %record.family_id,
                revoked,
                "Refresh token reuse detected, family revoked"
            );
            return Ok(RotateOutcome::Reused {
                family_id: record.family_id,
                revoked,
            });
        }

        if now >= record.expires_at {
            tx.rollback().await?;
            return Ok(RotateOutcome::Invalid(InvalidReason::Expired));
        }

        sqlx::query(
            "UPDATE refresh_tokens SET state = 'rotated', revoked_at = ? WHERE id = ? AND state = 'active'",
        )
        .bind(now as i64)
        .bind(&record.id)
        .execute(&mut *tx)
        .await?;

        let issued = insert_token(&mut tx, record.user_id, &record.family_id, now, ttl).await?;
        tx.commit().await?;

        Ok(RotateOutcome::Rotated(issued))
    }

    /// Look up a record by its raw token.
    pub async fn find_by_raw(
        &self,
        raw: &str,
    ) -> Result<Option<RefreshTokenRecord>, TokenStoreError> {
        let row: Option<RefreshTokenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM refresh_tokens WHERE token_hash = ?",
            TOKEN_COLUMNS
        ))
        .bind(hash_token(raw))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RefreshTokenRecord::from))
    }

    /// All records of a family, oldest first.
    pub async fn list_family(
        &self,
        family_id: &str,
    ) -> Result<Vec<RefreshTokenRecord>, TokenStoreError> {
        let rows: Vec<RefreshTokenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM refresh_tokens WHERE family_id = ? ORDER BY created_at, rowid",
            TOKEN_COLUMNS
        ))
        .bind(family_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RefreshTokenRecord::from).collect())
    }

    /// Active, unexpired records of a user (one per live session), newest first.
    pub async fn list_active_by_user(
        &self,
        user_id: i64,
        now: u64,
    ) -> Result<Vec<RefreshTokenRecord>, TokenStoreError> {
        let rows: Vec<RefreshTokenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM refresh_tokens WHERE user_id = ? AND state = 'active' AND expires_at > ? ORDER BY created_at DESC",
            TOKEN_COLUMNS
        ))
        .bind(user_id)
        .bind(now as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RefreshTokenRecord::from).collect())
    }

    /// Revoke the active token of a family. Returns the number of records changed.
    pub async fn revoke_family(&self, family_id: &str, now: u64) -> Result<u64, TokenStoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET state = 'revoked', revoked_at = ? WHERE family_id = ? AND state = 'active'",
        )
        .bind(now as i64)
        .bind(family_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Revoke every active token of a user (logout everywhere).
    pub async fn revoke_all_for_user(&self, user_id: i64, now: u64) -> Result<u64, TokenStoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET state = 'revoked', revoked_at = ? WHERE user_id = ? AND state = 'active'",
        )
        .bind(now as i64)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete expired records and records revoked more than `retention` seconds
    /// ago. Never touches an active, unexpired record.
    pub async fn cleanup(&self, now: u64, retention: u64) -> Result<u64, TokenStoreError> {
        let revoked_before = now.saturating_sub(retention);
        let result = sqlx::query(
            "DELETE FROM refresh_tokens WHERE expires_at < ? OR (revoked_at IS NOT NULL AND revoked_at < ?)",
        )
        .bind(now as i64)
        .bind(revoked_before as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: i64,
    family_id: &str,
    now: u64,
    ttl: u64,
) -> Result<IssuedToken, sqlx::Error> {
    let raw = generate_raw_token();
    let expires_at = now + ttl;

    sqlx::query(
        "INSERT INTO refresh_tokens (id, token_hash, user_id, family_id, state, created_at, expires_at) VALUES (?, ?, ?, ?, 'active', ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(hash_token(&raw))
    .bind(user_id)
    .bind(family_id)
    .bind(now as i64)
    .bind(expires_at as i64)
    .execute(&mut **tx)
    .await?;

    Ok(IssuedToken {
        raw,
        family_id: family_id.to_string(),
        expires_at,
    })
}
