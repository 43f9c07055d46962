//! Durable pipeline progress.
//!
//! One JSON document per run records which stages completed and what they
//! produced. Documents carry a schema version; older versions are migrated
//! on load and newer ones are refused.

mod file;
mod memory;
mod model;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use model::{decode_document, encode_document, PipelineRun, StageCheckpoint, CURRENT_SCHEMA_VERSION};

use crate::errors::CheckpointError;
use crate::utils::is_valid_run_id;
use async_trait::async_trait;
use std::fmt::Debug;

/// Storage backend for checkpoints.
///
/// Access to distinct run ids may be concurrent. Concurrent writes for the
/// same run id are not supported; one orchestrator drives one run.
#[async_trait]
pub trait CheckpointStore: Send + Sync + Debug {
    /// Loads the run's document, or `None` if it has no checkpoint.
    async fn load(&self, run_id: &str) -> Result<Option<PipelineRun>, CheckpointError>;

    /// Writes a fresh document for a run, replacing any existing one.
    async fn create(&self, run: &PipelineRun) -> Result<(), CheckpointError>;

    /// Upserts one stage checkpoint, keyed by stage name.
    ///
    /// The write is atomic: a reader sees the old or the new document,
    /// never a partial one.
    async fn save(&self, run_id: &str, checkpoint: &StageCheckpoint) -> Result<(), CheckpointError>;

    /// Removes the run's checkpoint. Deleting a missing checkpoint succeeds.
    async fn delete(&self, run_id: &str) -> Result<(), CheckpointError>;

    /// Returns whether the run has a checkpoint.
    async fn exists(&self, run_id: &str) -> Result<bool, CheckpointError>;

    /// Lists run ids that have checkpoints, sorted.
    async fn list(&self) -> Result<Vec<String>, CheckpointError>;
}

/// Rejects run ids that cannot be used as a single path component.
pub(crate) fn validate_run_id(run_id: &str) -> Result<(), CheckpointError> {
    if is_valid_run_id(run_id) {
        Ok(())
    } else {
        Err(CheckpointError::InvalidRunId(run_id.to_string()))
    }
}
