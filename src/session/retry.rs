use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::db::TokenStoreError;

/// Bounded exponential backoff for contended store writes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub base_delay: Duration,
    /// Add up to `base_delay` of random jitter to each wait
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(50),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt + 1` (`attempt` counts from 0).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.saturating_mul(1 << attempt.min(16));
        if !self.jitter || self.base_delay.is_zero() {
            return base;
        }
        let max_jitter = self.base_delay.as_millis() as u64;
        base + Duration::from_millis(rand::rng().random_range(0..=max_jitter))
    }

    /// Run `op` until it succeeds, fails with anything other than
    /// [`TokenStoreError::Contended`], or all attempts are used up.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, TokenStoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TokenStoreError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(TokenStoreError::Contended) if attempt + 1 < self.attempts => {
                    let delay = self.delay(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Store contended, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
