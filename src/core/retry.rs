//! Retry/backoff engine.
//!
//! A [`RetryPolicy`] is a plain value built with a builder. The same
//! [`RetryPolicy::decide`] drives both the in-process [`execute`] loop and the
//! worker pool's durable requeue, so every caller obeys one attempt budget.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::core::error::{EngineError, FailureClass};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`.
    Retry {
        /// Backoff before the next attempt.
        delay: Duration,
    },
    /// Give up.
    DeadLetter,
}

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(600),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy with the defaults (3 attempts, 1s base, x2, 10 minute cap, 20% jitter).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration.
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            multiplier: cfg.multiplier.max(1.0),
            max_delay: Duration::from_secs(cfg.max_delay_secs),
            jitter: cfg.jitter.clamp(0.0, 0.99),
        }
    }

    /// Total attempts, including the first.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Growth factor between retries.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Upper bound on a single delay.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Symmetric jitter fraction.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 0.99);
        self
    }

    /// Deterministic delays.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Total attempts, including the first.
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff after `attempts_made` failed attempts, before jitter:
    /// `min(base * multiplier^(attempts_made - 1), max_delay)`.
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        if attempts_made == 0 {
            return Duration::ZERO;
        }
        let exp = i32::try_from(attempts_made - 1).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        let capped = raw.min(self.max_delay.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped.max(0.0))
        } else {
            self.max_delay
        }
    }

    /// Backoff with jitter applied, still capped at `max_delay`.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let base = self.backoff(attempts_made);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::rng().random_range(-self.jitter..=self.jitter);
        let jittered = (base.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Decide after a failed attempt.
    ///
    /// Permanent failures and exhausted budgets dead-letter; a transient failure
    /// with attempts remaining retries after [`Self::delay_for`].
    pub fn decide(&self, attempts_made: u32, class: FailureClass) -> RetryDecision {
        if class == FailureClass::Permanent || attempts_made >= self.max_attempts {
            return RetryDecision::DeadLetter;
        }
        RetryDecision::Retry {
            delay: self.delay_for(attempts_made),
        }
    }
}

/// Terminal outcome of [`execute`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The classifier marked the error permanent.
    #[error("permanent failure after {attempts} attempt(s): {error}")]
    Permanent {
        /// Attempts made.
        attempts: u32,
        /// Last error.
        error: E,
    },
    /// Every attempt failed transiently.
    #[error("retries exhausted after {attempts} attempt(s): {error}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Last error.
        error: E,
    },
}

impl<E> RetryError<E> {
    /// Attempts made before giving up.
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Permanent { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The last error.
    pub fn into_inner(self) -> E {
        match self {
            Self::Permanent { error, .. } | Self::Exhausted { error, .. } => error,
        }
    }
}

/// Run `unit` until it succeeds or the policy dead-letters it.
///
/// `unit` receives the 1-based attempt number. `classify` maps each error to
/// transient or permanent.
///
/// # Errors
///
/// Returns [`RetryError::Permanent`] or [`RetryError::Exhausted`] with the last
/// error.
pub async fn execute<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    classify: C,
    mut unit: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> FailureClass,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match unit(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "unit of work succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                let class = classify(&error);
                match policy.decide(attempt, class) {
                    RetryDecision::Retry { delay } => {
                        warn!(
                            attempt,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %error,
                            "transient failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DeadLetter => {
                        return Err(if class == FailureClass::Permanent {
                            RetryError::Permanent {
                                attempts: attempt,
                                error,
                            }
                        } else {
                            RetryError::Exhausted {
                                attempts: attempt,
                                error,
                            }
                        });
                    }
                }
            }
        }
    }
}

/// [`execute`] for units returning [`EngineError`], classified by the taxonomy.
///
/// # Errors
///
/// See [`execute`].
pub async fn execute_classified<T, F, Fut>(
    policy: &RetryPolicy,
    unit: F,
) -> Result<T, RetryError<EngineError>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    execute(policy, EngineError::classification, unit).await
}
