//! Logging setup.
//!
//! Library code only emits `tracing` events and spans; binaries call
//! [`init_tracing`] once to install a subscriber. Runs are wrapped in a
//! `pipeline_run` span (`run_id`, `topic`, `execution_id`) and each stage in
//! a `stage` span (`stage`, `index`).

mod subscriber;

pub use subscriber::{init_tracing, init_tracing_with, LogFormat, TracingInitError, DEFAULT_FILTER};
