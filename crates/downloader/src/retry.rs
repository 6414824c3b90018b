//! Job-level retry.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DownloadError;

/// How often, and how far apart, a failed job is re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts. The last error is returned unchanged.
    ///
    /// `op` receives the 1-based attempt number. The wait between attempts
    /// ends early with [`DownloadError::Cancelled`] when `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, DownloadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.is_fatal() || !err.is_retryable() {
                debug!(attempt, error = %err, "not retrying");
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "giving up");
                return Err(err);
            }

            warn!(
                attempt,
                max_attempts,
                delay_secs = self.delay.as_secs(),
                error = %err,
                "attempt failed, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
    }
}
