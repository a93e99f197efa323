//! # Backoff Policy Module
//!
//! Exponential backoff with jitter, applied by the polling consumer between
//! failed receive attempts. Individual SDK calls are retried by the SDK itself;
//! this policy only spaces out whole poll cycles.

use crate::error::ValidationError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;

/// Exponential backoff configuration
///
/// # Examples
///
/// ```rust
/// use sqs_utils::backoff::BackoffPolicy;
/// use std::time::Duration;
///
/// // Default policy: 1s initial, 30s max, 2.0x multiplier, ±25% jitter
/// let policy = BackoffPolicy::default();
///
/// let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(5))
///     .without_jitter();
/// assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    #[serde(rename = "initial_delay_ms", with = "crate::duration_serde::millis")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    #[serde(rename = "max_delay_ms", with = "crate::duration_serde::millis")]
    pub max_delay: Duration,

    /// Exponential growth factor
    pub multiplier: f64,

    /// Jitter range as a fraction of the delay (0.25 = ±25%); zero disables jitter
    pub jitter_percent: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_percent: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with the default multiplier and jitter
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Disable jitter, making delays deterministic
    pub fn without_jitter(mut self) -> Self {
        self.jitter_percent = 0.0;
        self
    }

    /// Set custom jitter percentage (0.0 to 1.0)
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Delay before the next attempt after `attempt` consecutive prior failures
    /// (0-based): `initial * multiplier^attempt`, capped at `max_delay`.
    ///
    /// Jitter is applied after the cap, so a jittered delay may exceed
    /// `max_delay` by up to `jitter_percent`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        // powi overflows to infinity for large attempts; min() keeps that finite
        let capped_delay_secs = base_delay_secs
            .min(self.max_delay.as_secs_f64())
            .max(0.0);

        let final_delay_secs = if self.jitter_percent > 0.0 {
            Self::add_jitter(capped_delay_secs, self.jitter_percent)
        } else {
            capped_delay_secs
        };

        Duration::from_secs_f64(final_delay_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.initial_delay.is_zero() {
            return Err(ValidationError::OutOfRange {
                field: "error_backoff.initial_delay_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.max_delay < self.initial_delay {
            return Err(ValidationError::OutOfRange {
                field: "error_backoff.max_delay_ms".to_string(),
                message: "must not be less than initial_delay_ms".to_string(),
            });
        }

        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ValidationError::OutOfRange {
                field: "error_backoff.multiplier".to_string(),
                message: "must be at least 1.0".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_percent) {
            return Err(ValidationError::OutOfRange {
                field: "error_backoff.jitter_percent".to_string(),
                message: "must be between 0.0 and 1.0".to_string(),
            });
        }

        Ok(())
    }

    /// Applies random variation in range [delay * (1-jitter), delay * (1+jitter)]
    fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
        let mut rng = rand::thread_rng();
        let jitter_range = delay_secs * jitter_percent;
        let jitter = rng.gen_range(-jitter_range..=jitter_range);
        (delay_secs + jitter).max(0.0)
    }
}

/// Consecutive-failure counter driving a [`BackoffPolicy`]
#[derive(Debug, Clone, Default)]
pub struct BackoffState {
    failures: u32,
}

impl BackoffState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return how long to wait before trying again
    pub fn next_delay(&mut self, policy: &BackoffPolicy) -> Duration {
        let delay = policy.calculate_delay(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Forget previous failures after a success
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Number of consecutive failures recorded since the last reset
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
