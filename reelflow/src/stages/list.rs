//! Ordered stage lists.

use super::Stage;
use crate::errors::PipelineValidationError;
use std::collections::HashSet;
use std::sync::Arc;

/// The ordered stages of a pipeline.
///
/// Disabled stages are left out at construction time, so the orchestrator
/// only ever sees the stages it must run.
#[derive(Debug, Clone, Default)]
pub struct StageList {
    stages: Vec<Arc<dyn Stage>>,
}

impl StageList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    #[must_use]
    pub fn with(mut self, stage: Arc<dyn Stage>) -> Self {
        self.push(stage);
        self
    }

    /// Appends a stage.
    pub fn push(&mut self, stage: Arc<dyn Stage>) {
        self.stages.push(stage);
    }

    /// Appends a stage only when `enabled`.
    pub fn push_if(&mut self, enabled: bool, stage: Arc<dyn Stage>) {
        if enabled {
            self.stages.push(stage);
        }
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if there are no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the stage at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arc<dyn Stage>> {
        self.stages.get(index)
    }

    /// Iterates the stages in order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Stage>> {
        self.stages.iter()
    }

    /// Returns the stage names in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Checks that the list is runnable: at least one stage, every name
    /// non-empty and unique.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no enabled stages"));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            let name = stage.name();
            if name.trim().is_empty() {
                return Err(PipelineValidationError::new("Stage name cannot be empty"));
            }
            if !seen.insert(name) {
                return Err(PipelineValidationError::new(format!("Duplicate stage name '{name}'"))
                    .with_stages(vec![name.to_string()]));
            }
        }
        Ok(())
    }
}

impl FromIterator<Arc<dyn Stage>> for StageList {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Stage>>>(iter: I) -> Self {
        Self {
            stages: iter.into_iter().collect(),
        }
    }
}
