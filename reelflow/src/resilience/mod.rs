//! Resilience for calls to unreliable external services.
//!
//! [`RetryExecutor`] retries transient failures with jittered exponential
//! backoff and guards each named dependency with a circuit breaker so an
//! outage is not hammered (and billed) by every run in flight.

mod breaker;
mod executor;
mod policy;

pub use breaker::{Admission, BreakerSnapshot, BreakerState, CircuitBreakerRegistry, CircuitBreakerState};
pub use executor::{Attempted, RetryExecutor};
pub use policy::{CircuitBreakerConfig, DependencyPolicy, ResiliencePolicies, RetryPolicy};
