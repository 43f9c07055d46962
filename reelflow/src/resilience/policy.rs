//! Retry and circuit breaker policies.
//!
//! Policies are loaded once, wrapped in an `Arc` and shared read-only by
//! every run.

use crate::errors::{ErrorKind, StageError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Retry behaviour for one dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap applied before jitter, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Upper bound of the random extra delay, as a fraction of the delay.
    pub jitter_ratio: f64,
    /// Transient kinds worth retrying.
    pub retryable_error_kinds: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.2,
            retryable_error_kinds: ErrorKind::DEFAULT_RETRYABLE.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter ratio.
    #[must_use]
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    /// Replaces the retryable kinds.
    #[must_use]
    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_error_kinds = kinds.into_iter().collect();
        self
    }

    /// Returns the delay after failed attempt `attempt` (1-based), without jitter.
    ///
    /// `min(max_delay, base_delay * multiplier^(attempt - 1))`
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.max(1.0).powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_secs_f64(capped.max(0.0) / 1000.0)
    }

    /// Returns the backoff delay plus up to `jitter_ratio` of random extra.
    ///
    /// The ratio is clamped to `0.0..=1.0`; NaN means no jitter.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        let ratio = if self.jitter_ratio.is_nan() {
            0.0
        } else {
            self.jitter_ratio.clamp(0.0, 1.0)
        };
        if ratio == 0.0 || delay.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=ratio);
        delay.saturating_add(delay.mul_f64(extra))
    }

    /// Returns true if `err` should be retried under this policy.
    #[must_use]
    pub fn is_retryable(&self, err: &StageError) -> bool {
        match err {
            StageError::Transient { kind, .. } => self.retryable_error_kinds.contains(kind),
            StageError::Fatal { .. } | StageError::Cancelled { .. } => false,
        }
    }

    /// Lists problems with the numbers in this policy.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_attempts == 0 {
            problems.push("max_attempts must be at least 1".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            problems.push("max_delay_ms must not be below base_delay_ms".to_string());
        }
        if !(self.backoff_multiplier >= 1.0) {
            problems.push("backoff_multiplier must be at least 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            problems.push("jitter_ratio must be within 0.0..=1.0".to_string());
        }
        problems
    }
}

/// Circuit breaker thresholds for one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed calls that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before a trial call, in milliseconds.
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the cooldown.
    #[must_use]
    pub fn with_cooldown_ms(mut self, cooldown: u64) -> Self {
        self.cooldown_ms = cooldown;
        self
    }

    /// Returns the cooldown as a duration.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Retry and breaker settings for one dependency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyPolicy {
    /// Retry behaviour.
    pub retry: RetryPolicy,
    /// Breaker thresholds.
    pub breaker: CircuitBreakerConfig,
}

impl DependencyPolicy {
    /// Creates a dependency policy.
    #[must_use]
    pub fn new(retry: RetryPolicy, breaker: CircuitBreakerConfig) -> Self {
        Self { retry, breaker }
    }
}

/// Policies keyed by dependency name, with a fallback.
#[derive(Debug, Clone, Default)]
pub struct ResiliencePolicies {
    default: DependencyPolicy,
    overrides: HashMap<String, DependencyPolicy>,
}

impl ResiliencePolicies {
    /// Creates a registry where every dependency uses `default`.
    #[must_use]
    pub fn new(default: DependencyPolicy) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Sets the policy for one dependency.
    #[must_use]
    pub fn with_dependency(mut self, dependency: impl Into<String>, policy: DependencyPolicy) -> Self {
        self.overrides.insert(dependency.into(), policy);
        self
    }

    /// Returns the policy governing `dependency`.
    #[must_use]
    pub fn policy_for(&self, dependency: &str) -> &DependencyPolicy {
        self.overrides.get(dependency).unwrap_or(&self.default)
    }
}
