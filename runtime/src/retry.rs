//! Retry with exponential backoff for transient store failures.
//!
//! Only errors the caller classifies as retryable are retried; conflicts and
//! validation failures are returned on the first attempt.
//!
//! # Example
//!
//! ```rust
//! use clinic_queue_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(1))
//!     .max_delay(Duration::from_millis(10))
//!     .build();
//!
//! let result = retry_with_predicate(
//!     &policy,
//!     "example",
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("transient"),
//! )
//! .await;
//! assert_eq!(result, Ok(42));
//! # });
//! ```

use crate::metrics::RetryMetrics;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 50ms
/// - `max_delay`: 1 second
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: on (up to +25% of the computed delay)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Add random jitter so concurrent consoles do not retry in lockstep
    pub jitter: bool,
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
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            jitter: None,
        }
    }

    /// Policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::builder().max_retries(0).build()
    }

    /// Calculate the base delay for a given attempt number.
    ///
    /// Uses exponential backoff: delay = `initial_delay` * (multiplier ^ attempt)
    /// Capped at `max_delay`. Jitter is not included.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }

        Duration::from_millis(delay_ms as u64)
    }

    /// Delay to actually sleep before retry `attempt`, jitter included.
    #[must_use]
    pub fn backoff(&self, attempt: usize) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if !self.jitter {
            return base;
        }
        let spread = u64::try_from(base.as_millis() / 4).unwrap_or(0);
        if spread == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<bool>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(3),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(50)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(1)),
            multiplier: self.multiplier.unwrap_or(2.0),
            jitter: self.jitter.unwrap_or(true),
        }
    }
}

/// Retry an async operation while `is_retryable` says so.
///
/// `op` names the operation in logs.
///
/// # Errors
///
/// Returns the first non-retryable error unchanged, or the last retryable
/// error once `policy.max_retries` retries are spent.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    op: &'static str,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    RetryMetrics::record_success();
                    tracing::info!(op, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    RetryMetrics::record_exhausted();
                    tracing::error!(op, attempt, error = %err, "Operation failed after max retries");
                    return Err(err);
                }

                let delay = policy.backoff(attempt);
                RetryMetrics::record_attempt();
                tracing::warn!(
                    op,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Operation failed, retrying..."
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
