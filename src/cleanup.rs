//! Scheduled cleanup of expired and stale refresh tokens.

use std::time::Duration;

use tracing::{error, info};

use crate::clock::unix_now;
use crate::db::{Database, TokenStoreError};

/// Default interval between cleanup runs.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Delete expired records and records revoked more than `retention` seconds ago.
pub async fn cleanup_tokens(db: &Database, retention: u64) -> Result<u64, TokenStoreError> {
    db.refresh_tokens().cleanup(unix_now(), retention).await
}

/// Run all cleanup tasks once, logging the outcome.
pub async fn run_cleanup(db: &Database, retention: u64) {
    match cleanup_tokens(db, retention).await {
        Ok(count) if count > 0 => info!("Cleaned up {} refresh tokens", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up refresh tokens: {}", e),
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    db: Database,
    retention: u64,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately; startup already ran a pass.
        interval.tick().await;

        loop {
            interval.tick().await;
            run_cleanup(&db, retention).await;
        }
    })
}
