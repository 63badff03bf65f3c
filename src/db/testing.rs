//! File-backed databases for tests that need real SQLite locking.

use std::path::PathBuf;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::Connection;

use super::Database;

/// A database file under the temp dir, removed (with its WAL files) on drop.
pub struct TempDb {
    path: PathBuf,
}

impl TempDb {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("sessionwarden-{}.db", uuid::Uuid::new_v4()));
        Self { path }
    }

    pub fn path(&self) -> &str {
        self.path.to_str().unwrap()
    }

    pub async fn open(&self, busy_timeout: Duration) -> Database {
        Database::open_with_busy_timeout(self.path(), busy_timeout)
            .await
            .unwrap()
    }

    /// A separate connection holding the write lock until it is rolled back.
    pub async fn hold_write_lock(&self) -> SqliteConnection {
        let options = SqliteConnectOptions::new().filename(&self.path);
        let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut conn).await.unwrap();
        conn
    }
}

pub async fn release_write_lock(mut conn: SqliteConnection) {
    sqlx::query("ROLLBACK").execute(&mut conn).await.unwrap();
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}
