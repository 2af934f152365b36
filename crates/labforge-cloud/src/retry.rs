//! Bounded retry helper
//!
//! Every retrying loop in the engine (connecting to a node, waiting for it to
//! report an address, starting services, converging security groups) goes
//! through [`retry`]. Attempts run strictly one after another.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry configuration for provider and remote operations
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    pub max_delay: Duration,

    /// Backoff multiplier (1.0 keeps the delay fixed)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Fixed delay between every attempt
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
        }
    }

    /// Back-to-back attempts with no delay
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }

    /// Delay to wait after the given (zero-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        // an infinite factor clamps to the cap like any other large delay
        if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        }
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` attempts have
/// failed, returning the last error in the latter case.
pub async fn retry<T, E, F, Fut>(config: &RetryConfig, what: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation(attempt + 1).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    tracing::warn!("{} failed after {} attempts: {}", what, attempt, err);
                    return Err(err);
                }

                let delay = config.delay_for_attempt(attempt - 1);
                tracing::info!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what,
                    attempt,
                    max_attempts,
                    err,
                    delay
                );
                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }
        }
    }
}
