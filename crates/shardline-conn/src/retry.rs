//! Retry policy for resetting member connections.
//!
//! Sleeping goes through [`Sleeper`] so tests can run the reset loop
//! without real delays.

use std::time::Duration;

/// Attempt budget and linear backoff for connection resets.
///
/// The delay after failed attempt `n` (zero-based) is
/// `base_delay + step * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub step: Duration,
}

impl RetryPolicy {
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_add(self.step.saturating_mul(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(3),
            step: Duration::from_secs(1),
        }
    }
}

/// Source of delays between retries.
#[tonic::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[tonic::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
