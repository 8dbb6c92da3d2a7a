//! Bounded retry shared by both gateways.
//!
//! Every attempt runs under its own timeout. Between attempts the routine
//! sleeps with exponential backoff, capped at `max_backoff`. After the final
//! attempt the last error is returned; nothing retries forever here. Callers
//! that must keep trying (laser OFF) do so on their next control tick.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::errors::GatewayError;

/// Attempt count, per-attempt timeout and backoff for one class of command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total tries including the first; values below 1 are treated as 1
    pub attempts: u32,
    pub attempt_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, attempt_timeout: Duration) -> Self {
        Self {
            attempts,
            attempt_timeout,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Single attempt, no backoff.
    pub fn once(attempt_timeout: Duration) -> Self {
        Self::new(1, attempt_timeout)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            attempt_timeout: Duration::from_secs(2),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(3000),
        }
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// `operation` names the command in errors and logs.
pub async fn retry_bounded<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let attempts = policy.attempts.max(1);
    let mut backoff = policy.initial_backoff;
    let mut last_error = GatewayError::timeout(operation);

    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last_error = e,
            Err(_) => last_error = GatewayError::timeout(operation),
        }

        if attempt < attempts {
            debug!(
                "{} attempt {}/{} failed ({}), retrying in {:?}",
                operation, attempt, attempts, last_error, backoff
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(policy.max_backoff);
        }
    }

    Err(last_error)
}
