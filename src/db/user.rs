use sqlx::sqlite::SqlitePool;
use tracing::warn;

use crate::password::{DUMMY_HASH, hash_password_async, verify_password_async};

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "admin" => UserRole::Admin,
            _ => UserRole::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub uuid: String,
    pub login_id: String,
    pub name: String,
    pub role: UserRole,
    pub is_deleted: bool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: String,
    login_id: String,
    name: String,
    role: String,
    is_deleted: i32,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            login_id: row.login_id,
            name: row.name,
            role: UserRole::from_str(&row.role),
            is_deleted: row.is_deleted != 0,
        }
    }
}

const USER_COLUMNS: &str = "id, uuid, login_id, name, role, is_deleted";

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user with a hashed password. Returns the user ID.
    pub async fn create(
        &self,
        uuid: &str,
        login_id: &str,
        name: &str,
        password: &str,
        role: UserRole,
    ) -> Result<i64, sqlx::Error> {
        let password_hash = hash_password_async(password.to_string())
            .await
            .map_err(|e| sqlx::Error::Encode(e.to_string().into()))?;

        let result = sqlx::query(
            "INSERT INTO users (uuid, login_id, name, password_hash, role) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid)
        .bind(login_id)
        .bind(name)
        .bind(&password_hash)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Check a login id / password pair. Returns the user only if the password
    /// matches and the account has not been deleted.
    pub async fn verify_credentials(
        &self,
        login_id: &str,
        password: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id, password_hash FROM users WHERE login_id = ?")
                .bind(login_id)
                .fetch_optional(&self.pool)
                .await?;

        // Unknown login ids still pay for a full verification.
        let (id, password_hash) = match row {
            Some((id, hash)) => (Some(id), hash),
            None => (None, DUMMY_HASH.to_string()),
        };
        let verified = verify_password_async(password.to_string(), password_hash).await;
        let Some(id) = id else {
            return Ok(None);
        };

        match verified {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => {
                warn!(user_id = id, error = %e, "Stored password hash unusable");
                return Ok(None);
            }
        }

        let user = self.get_by_id(id).await?;
        Ok(user.filter(|u| !u.is_deleted))
    }

    /// Get a user by login id.
    pub async fn get_by_login_id(&self, login_id: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE login_id = ?",
            USER_COLUMNS
        ))
        .bind(login_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE uuid = ?", USER_COLUMNS))
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Set the role for a user.
    pub async fn set_role(&self, id: i64, role: UserRole) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete a user. The row stays so existing tokens can be recognised.
    pub async fn mark_deleted(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET is_deleted = 1 WHERE id = ? AND is_deleted = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
