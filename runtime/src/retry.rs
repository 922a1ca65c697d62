//! Local retries for infrastructure failures.
//!
//! Queue handlers and the expiration batch retry a failed database, cache or
//! broker call a few times before giving up on it (dead-lettering the message,
//! abandoning the chunk). Business rejections are final and never retried.
//!
//! ```rust
//! use coupon_runtime::retry::{RetryPolicy, retry_transient};
//! use std::time::Duration;
//!
//! # async fn example() -> coupon_core::Result<()> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(4)
//!     .initial_delay(Duration::from_millis(50))
//!     .jitter(true)
//!     .build();
//!
//! let remaining = retry_transient(policy, || async { Ok(10_i64) }).await?;
//! # assert_eq!(remaining, 10);
//! # Ok(())
//! # }
//! ```

use coupon_core::CouponError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How many times to retry, and how long to wait in between.
///
/// The wait before retry `n` (zero-based) is `initial_delay * multiplier^n`,
/// never more than `max_delay`. Defaults: 3 retries, 100ms doubling up to 30s,
/// no jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first call.
    pub max_retries: usize,
    /// Wait before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single wait.
    pub max_delay: Duration,
    /// Growth factor between consecutive waits.
    pub multiplier: f64,
    /// Scale each wait by a random factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Starts from the defaults.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder(Self::default())
    }

    /// Policy allowing `attempts` calls in total (at least one).
    #[must_use]
    pub fn with_max_attempts(attempts: usize) -> Self {
        Self {
            max_retries: attempts.saturating_sub(1),
            ..Self::default()
        }
    }

    /// Total number of calls this policy allows.
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Wait before retry number `retry` (zero-based).
    #[must_use]
    pub fn delay_for_attempt(&self, retry: usize) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        let uncapped = if factor.is_finite() {
            self.initial_delay.as_secs_f64() * factor
        } else {
            f64::MAX
        };
        let delay = Duration::try_from_secs_f64(uncapped)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }
}

/// Builder for [`RetryPolicy`]; unset fields keep their defaults.
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder(RetryPolicy);

impl RetryPolicyBuilder {
    /// Retries after the first call.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.0.max_retries = max_retries;
        self
    }

    /// Wait before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.0.initial_delay = delay;
        self
    }

    /// Upper bound on any single wait.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.0.max_delay = delay;
        self
    }

    /// Growth factor between consecutive waits.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.0.multiplier = multiplier;
        self
    }

    /// Spreads out retries of many consumers failing at the same moment.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.0.jitter = jitter;
        self
    }

    /// Finishes the policy.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.0
    }
}

/// Calls `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or the policy runs out of retries.
///
/// # Errors
///
/// The first error that is not retried.
pub async fn retry_if<F, Fut, T, E, P>(policy: RetryPolicy, mut operation: F, should_retry: P) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut retry = 0;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if retry > 0 {
                    tracing::debug!(retries = retry, "Recovered after retrying");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !should_retry(&err) || retry >= policy.max_retries {
            if retry > 0 {
                tracing::warn!(attempts = retry + 1, error = %err, "Giving up after retries");
            }
            return Err(err);
        }

        let delay = policy.delay_for_attempt(retry);
        tracing::debug!(retry, ?delay, error = %err, "Retrying after failure");
        sleep(delay).await;
        retry += 1;
    }
}

/// Retries a coupon operation on infrastructure errors only.
///
/// # Errors
///
/// Business errors at once, infrastructure errors when retries run out.
pub async fn retry_transient<F, Fut, T>(policy: RetryPolicy, operation: F) -> Result<T, CouponError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CouponError>>,
{
    retry_if(policy, operation, CouponError::is_retryable).await
}
