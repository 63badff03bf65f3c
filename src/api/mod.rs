mod admin;
mod auth;
mod cron;
mod error;

use std::sync::Arc;

use axum::Router;

use crate::rate_limit::RateLimitConfig;
use crate::session::SessionManager;

pub use error::{ApiError, ResultExt, error_response, validate_uuid};

/// Create the API router (mounted under `/api`).
pub fn create_api_router(
    sessions: SessionManager,
    secure_cookies: bool,
    cron_secret: Option<Arc<str>>,
    rate_limit: Arc<RateLimitConfig>,
) -> Router {
    let auth_state = auth::AuthState {
        sessions: sessions.clone(),
        secure_cookies,
    };

    let admin_state = admin::AdminState {
        sessions: sessions.clone(),
        secure_cookies,
    };

    let cron_state = cron::CronState {
        retention: sessions.config().retention,
        db: sessions.db().clone(),
        cron_secret,
    };

    Router::new()
        .nest("/auth", auth::router(auth_state, rate_limit))
        .nest("/admin", admin::router(admin_state))
        .nest("/cron", cron::router(cron_state))
}
