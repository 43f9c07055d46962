//! Per-dependency circuit breakers.
//!
//! States:
//! - Closed: calls proceed
//! - Open: calls are refused until the cooldown elapses
//! - HalfOpen: one trial call decides between Closed and Open
//!
//! Each dependency's state sits behind its own mutex; the lock is never
//! held across an await, so concurrent runs hitting the same dependency
//! see consistent transitions.

use super::CircuitBreakerConfig;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls proceed.
    Closed,
    /// Calls are refused.
    Open,
    /// A single trial call is allowed.
    HalfOpen,
}

/// Outcome of asking the breaker for permission to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed; call normally.
    Allowed,
    /// Breaker half-open; this caller owns the single trial call.
    Trial,
    /// Breaker open (or a trial is already running).
    Rejected {
        /// Remaining cooldown.
        retry_in: Duration,
    },
}

/// Mutable breaker state for one dependency.
#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

impl CircuitBreakerState {
    /// Returns the breaker position.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Returns the number of consecutive failed calls.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Returns when the breaker last opened.
    #[must_use]
    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Decides whether a call may proceed at `now`.
    pub fn try_acquire(&mut self, config: &CircuitBreakerConfig, now: Instant) -> Admission {
        match self.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= config.cooldown() {
                    self.state = BreakerState::HalfOpen;
                    self.trial_in_flight = true;
                    Admission::Trial
                } else {
                    Admission::Rejected {
                        retry_in: config.cooldown() - elapsed,
                    }
                }
            }
            BreakerState::HalfOpen => {
                if self.trial_in_flight {
                    Admission::Rejected {
                        retry_in: Duration::ZERO,
                    }
                } else {
                    self.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    /// Records a successful call: the breaker closes.
    pub fn record_success(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_in_flight = false;
    }

    /// Records one failed attempt. A failure while half-open reopens at once.
    ///
    /// Returns true if the breaker reopened.
    pub fn record_attempt_failure(&mut self, now: Instant) -> bool {
        self.trial_in_flight = false;
        if self.state == BreakerState::HalfOpen {
            self.state = BreakerState::Open;
            self.opened_at = Some(now);
            return true;
        }
        false
    }

    /// Records a call that ended in failure after its attempts.
    ///
    /// Returns true if this pushed the breaker open.
    pub fn record_call_failure(&mut self, config: &CircuitBreakerConfig, now: Instant) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.trial_in_flight = false;
        if self.consecutive_failures >= config.failure_threshold.max(1) {
            let newly_open = self.state != BreakerState::Open;
            self.state = BreakerState::Open;
            self.opened_at = Some(now);
            return newly_open;
        }
        false
    }

    /// Gives back an unresolved trial, e.g. after cancellation.
    pub fn release_trial(&mut self) {
        self.trial_in_flight = false;
    }
}

/// Point-in-time view of a breaker for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// The dependency name.
    pub dependency: String,
    /// Breaker position.
    pub state: BreakerState,
    /// Consecutive failed calls.
    pub consecutive_failures: u32,
}

/// Registry of breakers, one per dependency name.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    states: DashMap<String, Arc<Mutex<CircuitBreakerState>>>,
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state cell for `dependency`, creating it closed.
    #[must_use]
    pub fn entry(&self, dependency: &str) -> Arc<Mutex<CircuitBreakerState>> {
        if let Some(existing) = self.states.get(dependency) {
            return existing.clone();
        }
        self.states
            .entry(dependency.to_string())
            .or_default()
            .clone()
    }

    /// Returns a snapshot of `dependency`'s breaker, if it has been used.
    #[must_use]
    pub fn snapshot(&self, dependency: &str) -> Option<BreakerSnapshot> {
        self.states.get(dependency).map(|cell| {
            let state = cell.lock();
            BreakerSnapshot {
                dependency: dependency.to_string(),
                state: state.state(),
                consecutive_failures: state.consecutive_failures(),
            }
        })
    }

    /// Returns snapshots of every known breaker, sorted by name.
    #[must_use]
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut names: Vec<String> = self.states.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names.iter().filter_map(|n| self.snapshot(n)).collect()
    }

    /// Forces `dependency`'s breaker closed.
    pub fn reset(&self, dependency: &str) {
        if let Some(cell) = self.states.get(dependency) {
            cell.lock().record_success();
            info!(dependency = %dependency, "Circuit breaker reset");
        }
    }
}

/// Releases a half-open trial if the call never resolved.
pub(crate) struct TrialGuard {
    cell: Arc<Mutex<CircuitBreakerState>>,
    armed: bool,
}

impl TrialGuard {
    pub(crate) fn new(cell: Arc<Mutex<CircuitBreakerState>>) -> Self {
        Self { cell, armed: true }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard {
    fn drop(&mut self) {
        if self.armed {
            self.cell.lock().release_trial();
            warn!("Half-open trial call abandoned; trial slot released");
        }
    }
}
