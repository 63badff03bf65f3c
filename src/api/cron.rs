//! Cron-triggered maintenance endpoints.
//!
//! - GET|POST `/cleanup-tokens` - Run refresh token cleanup
//!
//! Authenticated with `Authorization: Bearer <CRON_SECRET>`. Without a
//! configured secret every call is rejected.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, header},
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use tracing::{info, warn};

use super::error::{ApiError, ResultExt};
use crate::cleanup::cleanup_tokens;
use crate::clock::{to_iso8601, unix_now};
use crate::db::Database;

#[derive(Clone)]
pub struct CronState {
    pub db: Database,
    pub cron_secret: Option<Arc<str>>,
    pub retention: u64,
}

pub fn router(state: CronState) -> Router {
    Router::new()
        .route("/cleanup-tokens", get(cleanup).post(cleanup))
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CleanupResponse {
    deleted_count: u64,
    executed_at: String,
}

/// Constant-time check of the bearer token against the configured secret.
fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    let Some(presented) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };

    presented.len() == secret.len()
        && openssl::memcmp::eq(presented.as_bytes(), secret.as_bytes())
}

async fn cleanup(
    State(state): State<CronState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let Some(secret) = state.cron_secret.as_deref() else {
        warn!("Cron cleanup called but CRON_SECRET is not configured");
        return Err(ApiError::unauthorized("Cron secret not configured"));
    };

    if !authorized(&headers, secret) {
        warn!("Cron cleanup called with an invalid secret");
        return Err(ApiError::unauthorized("Invalid cron secret"));
    }

    let deleted_count = cleanup_tokens(&state.db, state.retention)
        .await
        .db_err("Failed to clean up refresh tokens")?;
    info!(deleted_count, "Cron cleanup finished");

    Ok(Json(CleanupResponse {
        deleted_count,
        executed_at: to_iso8601(unix_now()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn bearer(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_authorized() {
        assert!(authorized(&bearer("Bearer s3cret"), "s3cret"));
        assert!(!authorized(&bearer("Bearer s3cre"), "s3cret"));
        assert!(!authorized(&bearer("Bearer wrong!"), "s3cret"));
        assert!(!authorized(&bearer("s3cret"), "s3cret"));
        assert!(!authorized(&HeaderMap::new(), "s3cret"));
    }
}
