//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is threaded through every stage call and every
//! backoff sleep. [`run_cancellable`] races a future against the token so
//! callers never wait for a slow external call to return once a run has
//! been cancelled.

mod token;

pub use token::{run_cancellable, sleep_cancellable, CancellationToken};
