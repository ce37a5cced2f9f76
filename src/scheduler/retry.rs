use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Exit codes that are never retried: 126 (found but not executable) and
/// 127 (command not found). Retrying these cannot succeed.
const NON_RETRYABLE_EXIT_CODES: [i32; 2] = [126, 127];

/// Exponential backoff is capped here no matter the attempt index.
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Decides whether and when a failed execution attempt is re-run.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Whether attempt `attempt` (0-indexed) should be followed by another.
    pub fn should_retry(&self, attempt: u32, exit_code: i32) -> bool {
        attempt < self.max_retries && !NON_RETRYABLE_EXIT_CODES.contains(&exit_code)
    }

    /// Backoff before the retry that follows attempt `attempt`:
    /// `base * 2^attempt`, capped at one hour.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = 2u32
            .checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(MAX_BACKOFF);
        delay.min(MAX_BACKOFF)
    }
}

/// Tracks the retry cancellation token for each job's latest firing.
///
/// A firing registers a fresh token before its first attempt, cancelling
/// whatever retry chain the previous firing of the same job left behind.
/// `remove(job_id)` and `stop()` cancel through here as well.
#[derive(Debug, Default)]
pub(crate) struct RetryRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl RetryRegistry {
    /// Cancel any outstanding retry chain for `job_id` and hand out the
    /// token guarding the new firing's retries.
    pub fn begin(&self, job_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = self
            .lock()
            .insert(job_id.to_string(), token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        token
    }

    pub fn cancel(&self, job_id: &str) {
        if let Some(token) = self.lock().remove(job_id) {
            token.cancel();
        }
    }

    pub fn cancel_all(&self) {
        for (_, token) in self.lock().drain() {
            token.cancel();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
