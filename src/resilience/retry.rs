//! Retry decisions for HTTP requests.

use std::time::Duration;

use crate::api::ApiError;

/// Stateless backoff policy; attempt counters live with the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Physical attempts per logical request, including the first
    pub max_attempts: u32,
    /// Unit of the exponential backoff (`unit * 2^attempt`)
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Disables retries
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Retry when no response arrived or the server failed (5xx)
    pub fn should_retry(&self, error: &ApiError) -> bool {
        matches!(error, ApiError::Network(_) | ApiError::ServerError(_))
    }

    /// Delay after failed attempt `attempt` (1-based): `2^attempt` units
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    /// Whether another attempt is allowed after `attempt` attempts
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}
