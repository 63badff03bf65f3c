#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use sessionwarden::{
    ServerConfig, create_app, create_app_with,
    db::{Database, UserRole},
    session::SessionConfig,
};
use sqlx::{Connection, sqlite::{SqliteConnectOptions, SqliteConnection}};
use tower::ServiceExt;

pub const JWT_SECRET: &[u8] = b"integration-test-jwt-secret-0123456789";
pub const SESSION_SECRET: &[u8] = b"integration-test-session-secret-012345";
pub const CRON_SECRET: &str = "integration-test-cron-secret";
pub const PASSWORD: &str = "correct horse battery staple";

pub fn test_config(db: Database, session: SessionConfig) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: JWT_SECRET.to_vec(),
        session_secret: SESSION_SECRET.to_vec(),
        cron_secret: Some(CRON_SECRET.into()),
        secure_cookies: false,
        session,
        cleanup_interval: Duration::from_secs(3600),
    }
}

/// App with default session timing, plus a handle on its database.
pub async fn create_test_app() -> (Router, Database) {
    create_test_app_with_config(SessionConfig::default()).await
}

pub async fn create_test_app_with_config(session: SessionConfig) -> (Router, Database) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let app = create_app(&test_config(db.clone(), session));
    (app, db)
}

/// App whose access tokens expire as soon as they are issued, so every
/// session request goes through rotation.
pub async fn create_expiring_app() -> (Router, Database) {
    create_test_app_with_config(SessionConfig {
        access_ttl: 0,
        ..SessionConfig::default()
    })
    .await
}

pub async fn create_test_app_with_routes(routes: Router) -> (Router, Database) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let app = create_app_with(&test_config(db.clone(), SessionConfig::default()), routes);
    (app, db)
}

/// A database file under the temp dir, removed with its WAL files on drop.
/// Needed wherever a test has to hold SQLite's write lock.
pub struct FileDb {
    path: PathBuf,
}

impl FileDb {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("sessionwarden-it-{}.db", uuid::Uuid::new_v4()));
        Self { path }
    }

    /// App on this file, with `busy_timeout` for ordinary writes.
    pub async fn create_app(&self, busy_timeout: Duration) -> (Router, Database) {
        let db = Database::open_with_busy_timeout(self.path.to_str().unwrap(), busy_timeout)
            .await
            .expect("Failed to open test database");
        let app = create_app(&test_config(db.clone(), SessionConfig::default()));
        (app, db)
    }

    /// A separate connection holding the write lock until released.
    pub async fn hold_write_lock(&self) -> SqliteConnection {
        let options = SqliteConnectOptions::new().filename(&self.path);
        let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut conn).await.unwrap();
        conn
    }
}

impl Drop for FileDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

pub async fn release_write_lock(mut conn: SqliteConnection) {
    sqlx::query("ROLLBACK").execute(&mut conn).await.unwrap();
}

pub async fn create_user(db: &Database, uuid: &str, login_id: &str, role: UserRole) -> i64 {
    db.users()
        .create(uuid, login_id, login_id, PASSWORD, role)
        .await
        .expect("Failed to create user")
}

/// Minimal cookie jar following Set-Cookie headers.
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn absorb<B>(&mut self, response: &Response<B>) {
        for value in response.headers().get_all(header::SET_COOKIE) {
            let Ok(value) = value.to_str() else { continue };
            let pair = value.split(';').next().unwrap_or_default();
            let Some((name, val)) = pair.split_once('=') else {
                continue;
            };
            if val.is_empty() || value.contains("Max-Age=0") {
                self.cookies.remove(name);
            } else {
                self.cookies.insert(name.to_string(), val.to_string());
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) {
        self.cookies.remove(name);
    }

    pub fn header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

pub fn set_cookies<B>(response: &Response<B>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(String::from)
        .collect()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub fn request(method: &str, uri: &str, jar: &CookieJar) -> axum::http::request::Builder {
    let builder = Request::builder().method(method).uri(uri);
    if jar.is_empty() {
        builder
    } else {
        builder.header(header::COOKIE, jar.header())
    }
}

/// POST /api/auth/login; absorbs cookies into `jar` and returns the response.
pub async fn login(
    app: &Router,
    jar: &mut CookieJar,
    login_id: &str,
    password: &str,
    remember_me: bool,
) -> (StatusCode, serde_json::Value) {
    let body = serde_json::json!({
        "loginId": login_id,
        "password": password,
        "rememberMe": remember_me,
    });
    let response = send(
        app,
        Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await;
    jar.absorb(&response);
    let status = response.status();
    (status, json_body(response).await)
}

/// GET /api/auth/session with the jar's cookies, absorbing the reply.
pub async fn session(app: &Router, jar: &mut CookieJar) -> (StatusCode, serde_json::Value) {
    let response = send(
        app,
        request("GET", "/api/auth/session", jar)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    jar.absorb(&response);
    let status = response.status();
    (status, json_body(response).await)
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}

pub async fn token_states(db: &Database) -> Vec<String> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT state FROM refresh_tokens ORDER BY rowid")
        .fetch_all(db.pool())
        .await
        .unwrap();
    rows.into_iter().map(|r| r.0).collect()
}
