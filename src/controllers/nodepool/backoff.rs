use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::time::Duration;

pub const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Per-object exponential backoff for failed reconciles.
///
/// A std Mutex keeps this callable from the synchronous error policy.
#[derive(Default)]
pub struct RetryTracker {
    failures: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    /// Count a failure for `key` and return how long to wait before the next attempt
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let attempt = failures.entry(key.to_owned()).or_default();
        let delay = INITIAL_RETRY_DELAY
            .checked_mul(2u32.saturating_pow(*attempt))
            .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY));
        *attempt = attempt.saturating_add(1);
        delay
    }

    pub fn reset(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
