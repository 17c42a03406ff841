use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ChainError, FailureClass, PipelineError, PipelineResult, Stage};

/// HTTP statuses worth retrying: auth/rate-limit rejections and upstream unavailability
const RETRYABLE_STATUSES: [u16; 5] = [401, 429, 502, 503, 504];

/// Classifies a failed remote call
pub fn classify(err: &ChainError) -> FailureClass {
    match err {
        ChainError::Http { status, .. } if RETRYABLE_STATUSES.contains(status) => {
            FailureClass::Transient
        }
        ChainError::Transport(_) | ChainError::Timeout(_) => FailureClass::Transient,
        _ => FailureClass::Fatal,
    }
}

pub fn should_retry(err: &ChainError) -> bool {
    classify(err) == FailureClass::Transient
}

/// Bounded exponential backoff around a single remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever
    pub max_attempts: Option<usize>,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            max_attempts: Some(10),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Runs `operation` until it succeeds, fails with a non-transient error, runs out of
    /// attempts, or `token` is cancelled
    pub async fn run<T, F, Fut>(
        &self,
        token: &CancellationToken,
        stage: Stage,
        mut operation: F,
    ) -> PipelineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let mut attempt = 0;
        let mut delay = self.initial_delay;

        loop {
            attempt += 1;

            let result = tokio::select! {
                _ = token.cancelled() => return Err(PipelineError::Cancelled),
                res = timeout(self.call_timeout, operation()) => {
                    res.unwrap_or(Err(ChainError::Timeout(self.call_timeout)))
                }
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let exhausted = self.max_attempts.is_some_and(|max| attempt >= max);
            if !should_retry(&err) || exhausted {
                return Err(PipelineError::Remote {
                    stage,
                    attempts: attempt,
                    source: err,
                });
            }

            warn!(%stage, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");

            tokio::select! {
                _ = token.cancelled() => return Err(PipelineError::Cancelled),
                _ = sleep(delay) => {}
            }
            delay = next_delay(delay, self.max_delay);
        }
    }
}

fn next_delay(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}
