//! # Reelflow
//!
//! Checkpointed, resumable orchestration for multi-stage content
//! production pipelines.
//!
//! Reelflow provides:
//!
//! - **Sequential stages**: an ordered list of stages, each turning the
//!   previous stage's output into its own
//! - **Checkpoint/resume**: every completed stage is persisted atomically;
//!   a resumed run skips what is already done
//! - **Resilience**: bounded retries with exponential backoff and a circuit
//!   breaker per external dependency
//! - **Progress and cancellation**: overall progress reporting and
//!   cooperative cancellation threaded through every stage and sleep
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reelflow::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("reel")
//!     .stage(Arc::new(IdeaStage::new()))
//!     .stage(Arc::new(ScriptStage::new()))
//!     .checkpoint_store(Arc::new(FileCheckpointStore::new(".reelflow/checkpoints")))
//!     .build()?;
//!
//! match pipeline.run("deep sea creatures", true, &CancellationToken::new()).await {
//!     RunOutcome::Succeeded { output, .. } => println!("{output}"),
//!     RunOutcome::Failed { failure, .. } => eprintln!("{failure}"),
//!     RunOutcome::Cancelled { stage, .. } => eprintln!("cancelled during {stage}"),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod progress;
pub mod resilience;
pub mod stages;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::checkpoint::{
        CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore, PipelineRun, StageCheckpoint,
    };
    pub use crate::config::{ConfigIssue, ReelflowConfig};
    pub use crate::core::{RunStatus, StageStatus, StageValue};
    pub use crate::errors::{
        CheckpointError, ErrorKind, FailureKind, PipelineValidationError, ReelflowError,
        ResilienceError, StageError,
    };
    pub use crate::pipeline::{PipelineBuilder, PipelineOrchestrator, RunOutcome, RunReport, StageFailure};
    pub use crate::progress::{LoggingProgressSink, ProgressEvent, ProgressSink, StageProgress};
    pub use crate::resilience::{
        CircuitBreakerConfig, DependencyPolicy, ResiliencePolicies, RetryExecutor, RetryPolicy,
    };
    pub use crate::stages::{CommandStage, FnStage, Stage, StageList, Typed, TypedStage};
    pub use crate::utils::{run_id_for_topic, Timestamp};
    pub use std::sync::Arc;
}
