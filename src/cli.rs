//! CLI argument parsing, validation, and startup helpers.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ServerConfig;
use crate::db::{Database, UserRole};
use crate::session::SessionConfig;

const MIN_SECRET_LENGTH: usize = 32;
const MIN_ADMIN_PASSWORD_LENGTH: usize = 8;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sessionwarden",
    about = "Session and refresh token service with reuse detection"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "7291")]
    pub port: u16,

    /// Path to SQLite database file (":memory:" for an in-memory database)
    #[arg(short, long, env = "DATABASE_PATH", default_value = "sessionwarden.db")]
    pub database: String,

    /// Path to file containing the JWT secret. Prefer the JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Path to file containing the presence cookie secret. Prefer SESSION_SECRET instead
    #[arg(long)]
    pub session_secret_file: Option<String>,

    /// Set the Secure flag on cookies (enable behind HTTPS)
    #[arg(long, env = "SECURE_COOKIES")]
    pub secure_cookies: bool,

    /// Access token lifetime in minutes
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    pub access_ttl_minutes: u64,

    /// Slide the access token when fewer than this many minutes remain
    #[arg(long, default_value = "15")]
    pub sliding_threshold_minutes: u64,

    /// Refresh token lifetime in days
    #[arg(long, default_value = "7", value_parser = clap::value_parser!(u64).range(1..))]
    pub refresh_ttl_days: u64,

    /// Remember-me presence cookie lifetime in days
    #[arg(long, default_value = "7", value_parser = clap::value_parser!(u64).range(1..))]
    pub presence_ttl_days: u64,

    /// Keep rotated and revoked refresh tokens this many days before cleanup
    #[arg(long, default_value = "7")]
    pub retention_days: u64,

    /// Minutes between background cleanup runs
    #[arg(long, default_value = "60", value_parser = clap::value_parser!(u64).range(1..))]
    pub cleanup_interval_minutes: u64,

    /// Create an admin user with this login id (password from ADMIN_PASSWORD)
    #[arg(long, value_name = "LOGIN_ID")]
    pub create_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

impl Args {
    pub fn session_config(&self) -> SessionConfig {
        const MINUTE: u64 = 60;
        const DAY: u64 = 24 * 60 * MINUTE;

        SessionConfig {
            access_ttl: self.access_ttl_minutes * MINUTE,
            sliding_threshold: self.sliding_threshold_minutes * MINUTE,
            refresh_ttl: self.refresh_ttl_days * DAY,
            presence_ttl: self.presence_ttl_days * DAY,
            retention: self.retention_days * DAY,
            ..SessionConfig::default()
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes * 60)
    }
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Read an environment variable and remove it from the process environment.
fn take_env(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    // SAFETY: We're single-threaded at this point during startup,
    // and no other code is reading this environment variable.
    unsafe { std::env::remove_var(name) };
    Some(value)
}

/// Load a signing/encryption secret from `env_var` or from a file.
/// Returns None and logs an error if the secret is missing or too short.
pub fn load_secret(env_var: &str, file: Option<&str>) -> Option<String> {
    let secret = if let Some(secret) = take_env(env_var) {
        secret
    } else if let Some(path) = file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read {} file", env_var);
                return None;
            }
        }
    } else {
        error!(
            "{} is required. Set the environment variable (recommended) or pass a secret file",
            env_var
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            "{} is shorter than {} characters. Use a longer secret",
            env_var, MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Load the optional cron secret. Without one the cleanup endpoint stays closed.
pub fn load_cron_secret() -> Option<String> {
    let secret = take_env("CRON_SECRET").filter(|s| !s.is_empty());
    if secret.is_none() {
        warn!("CRON_SECRET not set, cron cleanup endpoint disabled");
    }
    secret
}

/// Handle the --create-admin flag: create the admin unless the login id exists.
pub async fn handle_create_admin(db: &Database, login_id: &str) {
    match db.users().get_by_login_id(login_id).await {
        Ok(Some(existing)) => {
            info!(
                login_id = %existing.login_id,
                role = existing.role.as_str(),
                "User already exists, not creating admin"
            );
        }
        Ok(None) => {
            let Some(password) = take_env("ADMIN_PASSWORD") else {
                error!("ADMIN_PASSWORD is required with --create-admin");
                std::process::exit(1);
            };
            if password.len() < MIN_ADMIN_PASSWORD_LENGTH {
                error!(
                    "ADMIN_PASSWORD is shorter than {} characters",
                    MIN_ADMIN_PASSWORD_LENGTH
                );
                std::process::exit(1);
            }

            let uuid = Uuid::new_v4().to_string();
            match db
                .users()
                .create(&uuid, login_id, login_id, &password, UserRole::Admin)
                .await
            {
                Ok(_) => info!(login_id = %login_id, "Admin user created"),
                Err(e) => {
                    error!(error = %e, "Failed to create admin user");
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to check for existing user");
            std::process::exit(1);
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    db: Database,
    jwt_secret: String,
    session_secret: String,
    cron_secret: Option<String>,
) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        session_secret: session_secret.into_bytes(),
        cron_secret: cron_secret.map(Arc::from),
        secure_cookies: args.secure_cookies,
        session: args.session_config(),
        cleanup_interval: args.cleanup_interval(),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
