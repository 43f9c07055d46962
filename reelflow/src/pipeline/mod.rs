//! Pipeline building and execution.
//!
//! This module provides:
//! - The pipeline builder with validation
//! - The orchestrator state machine with checkpoint/resume
//! - Run outcomes and reports

mod builder;
mod orchestrator;
mod outcome;


pub use builder::PipelineBuilder;
pub use orchestrator::PipelineOrchestrator;
pub use outcome::{RunOutcome, RunReport, StageFailure, StageReport};
