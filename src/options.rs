use std::fmt;
use std::time::Duration;

use crate::{FailureReason, RelayError, Result};

/// Decides whether a non-terminal failure may be retried.
pub type RetryClassifier = fn(&FailureReason) -> bool;

/// Retries timeouts, transport errors, 429 and 5xx.
pub fn retry_transient(reason: &FailureReason) -> bool {
    matches!(
        reason,
        FailureReason::Timeout
            | FailureReason::NetworkError
            | FailureReason::RateLimited { .. }
            | FailureReason::ServerError { .. }
    )
}

/// Retries only failures where no HTTP status was received.
pub fn retry_transport_only(reason: &FailureReason) -> bool {
    matches!(reason, FailureReason::Timeout | FailureReason::NetworkError)
}

pub fn retry_never(_: &FailureReason) -> bool {
    false
}

/// Configures attempt count and exponential backoff for one call site.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base_ms: u64,
    classifier: RetryClassifier,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_attempt()
    }
}

impl RetryPolicy {
    /// Fails with [`RelayError::InvalidPolicy`] when `max_attempts` or
    /// `backoff_base_ms` is zero.
    pub fn new(max_attempts: u32, backoff_base_ms: u64, classifier: RetryClassifier) -> Result<Self> {
        if max_attempts == 0 {
            return Err(RelayError::InvalidPolicy(
                "max_attempts must be at least 1".to_owned(),
            ));
        }
        if backoff_base_ms == 0 {
            return Err(RelayError::InvalidPolicy(
                "backoff_base_ms must be greater than zero".to_owned(),
            ));
        }
        Ok(Self {
            max_attempts,
            backoff_base_ms,
            classifier,
        })
    }

    /// One attempt, nothing retried.
    pub const fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            backoff_base_ms: 1_000,
            classifier: retry_never,
        }
    }

    /// Initial attempt plus two retries on transient failures, 1s then 2s apart.
    pub const fn completion() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            classifier: retry_transient,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff_base_ms(&self) -> u64 {
        self.backoff_base_ms
    }

    /// Whether `reason`, seen on attempt `attempt_index` (0-based), earns
    /// another attempt.
    pub fn should_retry(&self, reason: &FailureReason, attempt_index: u32) -> bool {
        if reason.is_terminal() {
            return false;
        }
        attempt_index.saturating_add(1) < self.max_attempts && (self.classifier)(reason)
    }

    /// Wait after a failed attempt `attempt_index`: `base * 2^attempt_index`.
    pub fn backoff_delay(&self, attempt_index: u32) -> Duration {
        let multiplier = 1u64.checked_shl(attempt_index).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(multiplier))
    }
}
