//! Retry Executor: exponential backoff with jitter and cooperative cancellation
//!
//! [`ExponentialBackoff`] runs a fallible operation until it succeeds, the
//! attempt budget is spent, or the caller's [`Context`] is done. Between
//! attempts it waits
//!
//! ```text
//! delay(n) = min(initial_delay × multiplier^(n-1), max_delay) ± jitter × delay
//! ```
//!
//! Jitter is applied after the cap, so a jittered delay may exceed
//! `max_delay` by up to the jitter fraction.
//!
//! The wait races the context: a cancellation or deadline during backoff
//! aborts at once with [`RetryError::Cancelled`] rather than after the full
//! delay.
//!
//! # Example
//!
//! ```no_run
//! use aigate_core_resilience::{Context, ExponentialBackoff, RetryConfig, RetryStrategy};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let executor = ExponentialBackoff::new(RetryConfig {
//!     max_attempts: 5,
//!     initial_delay: Duration::from_millis(200),
//!     ..Default::default()
//! });
//!
//! let ctx = Context::new().with_timeout(Duration::from_secs(10));
//! let result = executor
//!     .execute_with_retry(&ctx, |_ctx| async {
//!         // call the flaky backend here
//!         Ok::<_, std::io::Error>(42)
//!     })
//!     .await;
//! # let _ = result;
//! # }
//! ```

use crate::context::Context;
use crate::error::RetryError;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_JITTER: f64 = 0.1;

/// Backoff configuration. Read-only once an executor is built from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, first one included
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Growth factor applied per attempt
    pub multiplier: f64,

    /// Cap on the un-jittered delay
    pub max_delay: Duration,

    /// Fraction of the delay used as a uniform ± perturbation (0 = none)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryConfig {
    /// Replace zero-valued fields with the defaults.
    ///
    /// A zero `jitter` stays zero. Out-of-range jitter is clamped into
    /// `[0, 1]` (NaN becomes 0) and a multiplier that is not a positive
    /// finite number falls back to the default.
    pub fn normalized(mut self) -> Self {
        if self.max_attempts == 0 {
            self.max_attempts = DEFAULT_MAX_ATTEMPTS;
        }
        if self.initial_delay.is_zero() {
            self.initial_delay = DEFAULT_INITIAL_DELAY;
        }
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            self.multiplier = DEFAULT_MULTIPLIER;
        }
        if self.max_delay.is_zero() {
            self.max_delay = DEFAULT_MAX_DELAY;
        }
        self.jitter = if self.jitter.is_nan() {
            0.0
        } else {
            self.jitter.clamp(0.0, 1.0)
        };
        self
    }

    /// Same configuration with a different attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Check that the values describe a usable backoff curve
    pub fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(format!(
                "multiplier must be a positive finite number, got {}",
                self.multiplier
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("jitter must be within [0, 1], got {}", self.jitter));
        }
        if !self.max_delay.is_zero() && self.initial_delay > self.max_delay {
            return Err(format!(
                "initial delay {:?} exceeds max delay {:?}",
                self.initial_delay, self.max_delay
            ));
        }
        Ok(())
    }
}

/// Retry contract: delay curve, retry predicate and the execution loop
#[async_trait]
pub trait RetryStrategy: Send + Sync {
    /// Delay to wait after the given (1-based) failed attempt
    fn calculate_delay(&self, attempt: u32) -> Duration;

    /// Whether another attempt follows a failure of `attempt`
    fn should_retry(&self, attempt: u32, max_retries: u32) -> bool;

    /// Run `op` until success, exhaustion of the budget, or cancellation.
    ///
    /// `op` receives a clone of `ctx` so it can pass cancellation down to
    /// the backend call.
    async fn execute_with_retry<F, Fut, T, E>(
        &self,
        ctx: &Context,
        op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(Context) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: Display + Send;
}

/// Exponential backoff executor. Holds no mutable state, so one instance can
/// serve any number of concurrent callers.
#[derive(Debug, Clone, Default)]
pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Build an executor; zero-valued fields fall back to the defaults
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    /// Effective configuration after defaults were applied
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn base_delay(&self, attempt: u32) -> f64 {
        let initial = self.config.initial_delay.as_nanos() as f64;
        let cap = self.config.max_delay.as_nanos() as f64;

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = initial * self.config.multiplier.powi(exponent);

        if delay.is_nan() || delay > cap {
            cap
        } else {
            delay
        }
    }

    /// `Duration::from_nanos` truncates past `u64::MAX` nanoseconds, so
    /// larger delays go through seconds and saturate at `max_delay`.
    fn to_duration(&self, nanos: f64) -> Duration {
        let nanos = nanos.max(0.0);
        if nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos as u64)
        } else {
            Duration::try_from_secs_f64(nanos / 1e9).unwrap_or(self.config.max_delay)
        }
    }
}

#[async_trait]
impl RetryStrategy for ExponentialBackoff {
    fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.config.initial_delay;
        }

        let mut delay = self.base_delay(attempt);

        if self.config.jitter > 0.0 {
            let amount = delay * self.config.jitter;
            delay += rand::rng().random_range(-amount..=amount);
        }

        self.to_duration(delay)
    }

    fn should_retry(&self, attempt: u32, max_retries: u32) -> bool {
        attempt < max_retries
    }

    async fn execute_with_retry<F, Fut, T, E>(
        &self,
        ctx: &Context,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(Context) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: Display + Send,
    {
        let max_attempts = self.config.max_attempts;
        let mut attempt: u32 = 0;

        loop {
            if let Some(reason) = ctx.err() {
                debug!(attempt, %reason, "retry cancelled before attempt");
                return Err(RetryError::Cancelled {
                    attempts: attempt,
                    reason,
                    during_backoff: false,
                });
            }

            attempt += 1;
            debug!(attempt, max_attempts, "executing attempt");

            let error = match op(ctx.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !self.should_retry(attempt, max_attempts) {
                warn!(attempts = attempt, error = %error, "retry budget exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = self.calculate_delay(attempt);
            debug!(attempt, ?delay, error = %error, "attempt failed, backing off");

            tokio::select! {
                biased;
                reason = ctx.done() => {
                    debug!(attempt, %reason, "retry cancelled during backoff");
                    return Err(RetryError::Cancelled {
                        attempts: attempt,
                        reason,
                        during_backoff: true,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
