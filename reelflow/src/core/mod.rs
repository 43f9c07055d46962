//! Core domain types shared by every component.
//!
//! - Run and stage state enums for the orchestrator's state machine
//! - The opaque payload type passed between stages

mod status;

pub use status::{RunStatus, StageStatus};

/// Opaque stage payload.
///
/// A stage's output is persisted verbatim as the checkpoint `outputRef` and
/// handed to the next stage as its input.
pub type StageValue = serde_json::Value;
