//! Retry executor guarding calls to external dependencies.

use super::breaker::{Admission, CircuitBreakerRegistry, TrialGuard};
use super::{BreakerSnapshot, ResiliencePolicies};
use crate::cancellation::{run_cancellable, sleep_cancellable, CancellationToken};
use crate::errors::{ResilienceError, StageError};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A successful result together with the attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    /// The value produced.
    pub value: T,
    /// Attempts consumed, starting at 1.
    pub attempts: u32,
}

/// Wraps fallible calls with bounded retries, exponential backoff and a
/// circuit breaker per dependency.
///
/// Clones share the breaker registry, so one executor can serve many
/// concurrent runs while keeping breaker state consistent.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policies: Arc<ResiliencePolicies>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(Arc::new(ResiliencePolicies::default()))
    }
}

impl RetryExecutor {
    /// Creates an executor with its own breaker registry.
    #[must_use]
    pub fn new(policies: Arc<ResiliencePolicies>) -> Self {
        Self {
            policies,
            breakers: Arc::new(CircuitBreakerRegistry::new()),
        }
    }

    /// Returns the policies in force.
    #[must_use]
    pub fn policies(&self) -> &ResiliencePolicies {
        &self.policies
    }

    /// Returns the breaker registry.
    #[must_use]
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Returns a snapshot of one dependency's breaker.
    #[must_use]
    pub fn breaker(&self, dependency: &str) -> Option<BreakerSnapshot> {
        self.breakers.snapshot(dependency)
    }

    /// Runs `operation` under the policy for `dependency`.
    ///
    /// `operation` receives the 1-based attempt number. Retryable failures
    /// are retried after a jittered exponential delay until the policy's
    /// attempts run out; the breaker is consulted before every attempt.
    /// Cancellation is honoured during the call and during backoff sleeps.
    pub async fn execute_with_resilience<T, F, Fut>(
        &self,
        dependency: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<Attempted<T>, ResilienceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let policy = self.policies.policy_for(dependency);
        let cell = self.breakers.entry(dependency);
        let mut attempt: u32 = 1;

        loop {
            let admission = cell.lock().try_acquire(&policy.breaker, Instant::now());
            let mut trial = match admission {
                Admission::Rejected { retry_in } => {
                    debug!(
                        dependency = %dependency,
                        retry_in_ms = u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
                        "Circuit open; call skipped"
                    );
                    return Err(ResilienceError::CircuitOpen {
                        dependency: dependency.to_string(),
                        retry_in,
                        attempts: attempt - 1,
                    });
                }
                Admission::Trial => {
                    info!(dependency = %dependency, "Circuit half-open; sending trial call");
                    Some(TrialGuard::new(cell.clone()))
                }
                Admission::Allowed => None,
            };

            let outcome = run_cancellable(cancel, operation(attempt)).await;

            let err = match outcome {
                Err(reason) | Ok(Err(StageError::Cancelled { reason })) => {
                    return Err(ResilienceError::Cancelled {
                        dependency: dependency.to_string(),
                        reason,
                    });
                }
                Ok(Ok(value)) => {
                    let recovered = cell.lock().consecutive_failures() > 0 || trial.is_some();
                    cell.lock().record_success();
                    if let Some(guard) = trial.as_mut() {
                        guard.disarm();
                    }
                    if recovered {
                        info!(dependency = %dependency, attempt, "Dependency recovered; circuit closed");
                    }
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Ok(Err(err)) => err,
            };

            let reopened = cell.lock().record_attempt_failure(Instant::now());
            if let Some(guard) = trial.as_mut() {
                guard.disarm();
            }
            if reopened {
                warn!(dependency = %dependency, attempt, error = %err, "Trial call failed; circuit reopened");
            }

            if !policy.retry.is_retryable(&err) {
                self.record_call_failure(dependency, &cell, policy);
                warn!(dependency = %dependency, attempt, error = %err, "Non-retryable failure");
                return Err(ResilienceError::NonRetryable {
                    dependency: dependency.to_string(),
                    attempts: attempt,
                    source: err.into_fatal(),
                });
            }

            if attempt >= policy.retry.max_attempts {
                self.record_call_failure(dependency, &cell, policy);
                warn!(dependency = %dependency, attempts = attempt, error = %err, "Retries exhausted");
                return Err(ResilienceError::Exhausted {
                    dependency: dependency.to_string(),
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = policy.retry.jittered_delay(attempt);
            warn!(
                dependency = %dependency,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Transient failure; retrying after backoff"
            );
            if let Err(reason) = sleep_cancellable(cancel, delay).await {
                return Err(ResilienceError::Cancelled {
                    dependency: dependency.to_string(),
                    reason,
                });
            }
            attempt += 1;
        }
    }

    fn record_call_failure(
        &self,
        dependency: &str,
        cell: &parking_lot::Mutex<super::CircuitBreakerState>,
        policy: &super::DependencyPolicy,
    ) {
        let mut state = cell.lock();
        if state.record_call_failure(&policy.breaker, Instant::now()) {
            warn!(
                dependency = %dependency,
                consecutive_failures = state.consecutive_failures(),
                cooldown_ms = policy.breaker.cooldown_ms,
                "Circuit opened"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, FailureKind};
    use crate::resilience::{BreakerState, CircuitBreakerConfig, DependencyPolicy, RetryPolicy};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn executor(retry: RetryPolicy, breaker: CircuitBreakerConfig) -> RetryExecutor {
        RetryExecutor::new(Arc::new(ResiliencePolicies::new(DependencyPolicy::new(retry, breaker))))
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_base_delay_ms(10)
            .with_max_delay_ms(100)
            .with_jitter_ratio(0.0)
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let exec = RetryExecutor::default();
        let result = exec
            .execute_with_resilience("llm", &CancellationToken::new(), |_| async { Ok::<_, StageError>(42) })
            .await
            .unwrap();
        assert_eq!(result, Attempted { value: 42, attempts: 1 });
        assert_eq!(exec.breaker("llm").unwrap().state, BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let exec = executor(fast_retry(3), CircuitBreakerConfig::default());
        let calls = AtomicU32::new(0);

        let result = exec
            .execute_with_resilience("tts", &CancellationToken::new(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(StageError::transient(ErrorKind::ServerError, "503"))
                    } else {
                        Ok("audio.wav")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(exec.breaker("tts").unwrap().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nan_jitter_still_retries() {
        let exec = executor(fast_retry(2).with_jitter_ratio(f64::NAN), CircuitBreakerConfig::default());
        let result = exec
            .execute_with_resilience("tts", &CancellationToken::new(), |attempt| async move {
                if attempt == 1 {
                    Err(StageError::transient(ErrorKind::ServerError, "503"))
                } else {
                    Ok("audio.wav")
                }
            })
            .await
            .unwrap();
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_is_transient() {
        let exec = executor(fast_retry(3), CircuitBreakerConfig::default());
        let calls = AtomicU32::new(0);

        let err = exec
            .execute_with_resilience("tts", &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StageError::transient(ErrorKind::Timeout, "slow")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.failure_kind(), FailureKind::Transient);
        assert_eq!(err.attempts(), 3);
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let exec = executor(fast_retry(5), CircuitBreakerConfig::default());
        let calls = AtomicU32::new(0);

        let err = exec
            .execute_with_resilience("llm", &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StageError::invalid_input("empty prompt")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.failure_kind(), FailureKind::Fatal);
    }

    #[tokio::test]
    async fn test_unlisted_transient_kind_becomes_fatal() {
        let retry = fast_retry(5).with_retryable([ErrorKind::Timeout]);
        let exec = executor(retry, CircuitBreakerConfig::default());

        let err = exec
            .execute_with_resilience("llm", &CancellationToken::new(), |_| async {
                Err::<(), _>(StageError::transient(ErrorKind::RateLimited, "429"))
            })
            .await
            .unwrap_err();

        match err {
            ResilienceError::NonRetryable { source, attempts, .. } => {
                assert_eq!(attempts, 1);
                assert_eq!(source, StageError::fatal(ErrorKind::RateLimited, "429"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_after_threshold() {
        let exec = executor(fast_retry(3), CircuitBreakerConfig::default().with_failure_threshold(3));
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            let err = exec
                .execute_with_resilience("video", &cancel, |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(StageError::transient(ErrorKind::ServerError, "502")) }
                })
                .await
                .unwrap_err();
            assert_eq!(err.failure_kind(), FailureKind::Transient);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 9);
        assert_eq!(exec.breaker("video").unwrap().state, BreakerState::Open);

        let err = exec
            .execute_with_resilience("video", &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, StageError>(()) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_closes_breaker() {
        let breaker = CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_cooldown_ms(5_000);
        let exec = executor(fast_retry(1), breaker);
        let cancel = CancellationToken::new();

        let _ = exec
            .execute_with_resilience("llm", &cancel, |_| async {
                Err::<(), _>(StageError::transient(ErrorKind::Network, "reset"))
            })
            .await;
        assert_eq!(exec.breaker("llm").unwrap().state, BreakerState::Open);

        tokio::time::advance(Duration::from_secs(6)).await;

        let ok = exec
            .execute_with_resilience("llm", &cancel, |_| async { Ok::<_, StageError>("fine") })
            .await
            .unwrap();
        assert_eq!(ok.value, "fine");
        assert_eq!(exec.breaker("llm").unwrap().state, BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_stops() {
        let breaker = CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_cooldown_ms(5_000);
        let exec = executor(fast_retry(3), breaker);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let _ = exec
            .execute_with_resilience("llm", &cancel, |_| async {
                Err::<(), _>(StageError::invalid_input("bad"))
            })
            .await;
        tokio::time::advance(Duration::from_secs(6)).await;

        let err = exec
            .execute_with_resilience("llm", &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StageError::transient(ErrorKind::Network, "reset")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.failure_kind(), FailureKind::CircuitOpen);
        assert_eq!(err.attempts(), 1);
        assert_eq!(exec.breaker("llm").unwrap().state, BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_monotonic_and_capped() {
        let retry = RetryPolicy::new()
            .with_max_attempts(7)
            .with_base_delay_ms(1000)
            .with_multiplier(2.0)
            .with_max_delay_ms(30_000)
            .with_jitter_ratio(0.0);
        let exec = executor(retry, CircuitBreakerConfig::default());
        let stamps = parking_lot::Mutex::new(Vec::new());

        let _ = exec
            .execute_with_resilience("images", &CancellationToken::new(), |_| {
                stamps.lock().push(Instant::now());
                async { Err::<(), _>(StageError::transient(ErrorKind::RateLimited, "429")) }
            })
            .await;

        let stamps = stamps.into_inner();
        let delays: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(delays.len(), 6);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(30)));
        assert!(delays[0] >= Duration::from_secs(1) && delays[0] < Duration::from_millis(1010));
        assert!(delays[5] >= Duration::from_millis(29_990));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let retry = fast_retry(5).with_base_delay_ms(60_000).with_max_delay_ms(60_000);
        let exec = executor(retry, CircuitBreakerConfig::default());
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel("operator abort");
        });

        let err = exec
            .execute_with_resilience("video", &cancel, |_| async {
                Err::<(), _>(StageError::transient(ErrorKind::Timeout, "slow"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.failure_kind(), FailureKind::Cancelled);
        assert_eq!(exec.breaker("video").unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_operation_reported_cancel() {
        let exec = RetryExecutor::default();
        let err = exec
            .execute_with_resilience("llm", &CancellationToken::new(), |_| async {
                Err::<(), _>(StageError::cancelled("stage noticed"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::Cancelled { ref reason, .. } if reason == "stage noticed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_runs_share_breaker() {
        let exec = executor(fast_retry(1), CircuitBreakerConfig::default().with_failure_threshold(4));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let exec = exec.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                exec.execute_with_resilience("tts", &cancel, |_| async {
                    Err::<(), _>(StageError::transient(ErrorKind::ServerError, "500"))
                })
                .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }

        let snap = exec.breaker("tts").unwrap();
        assert_eq!(snap.consecutive_failures, 4);
        assert_eq!(snap.state, BreakerState::Open);
    }
}
