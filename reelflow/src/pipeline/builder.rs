//! Pipeline builder with validation.

use super::PipelineOrchestrator;
use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use crate::errors::PipelineValidationError;
use crate::progress::{ProgressReporter, ProgressSink};
use crate::resilience::RetryExecutor;
use crate::stages::{Stage, StageList};
use std::sync::Arc;

/// Builder for creating validated pipelines.
///
/// Unset collaborators default to an in-memory checkpoint store, an
/// executor with default policies and a no-op progress sink.
pub struct PipelineBuilder {
    name: String,
    stages: StageList,
    store: Option<Arc<dyn CheckpointStore>>,
    executor: Option<RetryExecutor>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("stages", &self.stages.names())
            .field("store", &self.store)
            .field("executor", &self.executor)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: StageList::new(),
            store: None,
            executor: None,
            progress: None,
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends a stage only when `enabled`.
    #[must_use]
    pub fn stage_if(mut self, enabled: bool, stage: Arc<dyn Stage>) -> Self {
        self.stages.push_if(enabled, stage);
        self
    }

    /// Appends every stage of `stages`.
    #[must_use]
    pub fn stages(mut self, stages: StageList) -> Self {
        for stage in stages.iter() {
            self.stages.push(stage.clone());
        }
        self
    }

    /// Sets the checkpoint store.
    #[must_use]
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the retry executor. Pass a clone to share breakers across pipelines.
    #[must_use]
    pub fn executor(mut self, executor: RetryExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Sets the progress sink.
    #[must_use]
    pub fn progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Validates the stage list and builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no stages or stage names are empty or
    /// duplicated.
    pub fn build(self) -> Result<PipelineOrchestrator, PipelineValidationError> {
        self.stages.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryCheckpointStore::new()));
        let progress = self
            .progress
            .map_or_else(ProgressReporter::default, ProgressReporter::new);

        Ok(PipelineOrchestrator::new(
            self.name,
            self.stages,
            store,
            self.executor.unwrap_or_default(),
            progress,
        ))
    }
}
