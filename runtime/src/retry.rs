//! Exponential backoff for reconnects and worker recovery.
//!
//! The connection manager drives every connect attempt through
//! [`retry_with_predicate`] so only transport failures are retried; the worker
//! loop uses [`RetryPolicy::delay_for_attempt`] directly to back off between
//! failed polls.
//!
//! # Example
//!
//! ```rust
//! use relay_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(2))
//!     .build();
//!
//! let value = retry_with_predicate(
//!     &policy,
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("refused"),
//! )
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Backoff policy.
///
/// # Default Values
///
/// - `max_attempts`: 3 (total attempts, including the first)
/// - `initial_delay`: 100ms
/// - `max_delay`: 2 seconds
/// - `multiplier`: 2.0
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Never below 1.
    pub max_attempts: usize,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Cap for the exponential growth
    pub max_delay: Duration,
    /// Growth factor per failure
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }

    /// Default reconnect policy with a custom attempt budget.
    #[must_use]
    pub fn with_max_attempts(max_attempts: usize) -> Self {
        Self::builder().max_attempts(max_attempts).build()
    }

    /// Delay to sleep after failure number `failure` (zero-based).
    ///
    /// `initial_delay * multiplier^failure`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, failure: usize) -> Duration {
        let exponent = i32::try_from(failure).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: usize,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryPolicyBuilder {
    /// Set the total attempt budget (clamped to at least 1).
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay after the first failure.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the backoff cap.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: self.initial_delay,
            max_delay: self.max_delay.max(self.initial_delay),
            multiplier: self.multiplier.max(1.0),
        }
    }
}

/// Retry `operation` while `is_retryable` accepts its error.
///
/// # Errors
///
/// Returns the first non-retryable error immediately, or the error of the last
/// attempt once the budget is spent.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut failures = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if failures > 0 {
                    tracing::info!(attempt = failures + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !is_retryable(&err) => {
                tracing::warn!(error = %err, "Error is not retryable, failing immediately");
                return Err(err);
            }
            Err(err) => {
                failures += 1;
                if failures >= policy.max_attempts {
                    tracing::error!(attempts = failures, error = %err, "Operation failed after max attempts");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(failures - 1);
                tracing::warn!(
                    attempt = failures,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying..."
                );
                sleep(delay).await;
            }
        }
    }
}
