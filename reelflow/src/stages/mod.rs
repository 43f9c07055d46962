//! Stage contract and implementations.
//!
//! A stage is one pipeline step: a function from the previous stage's
//! output to its own output, given a progress handle and a cancellation
//! token. Stages are stateless and shared across runs; their `name` is the
//! checkpoint key.

mod command;
mod list;
mod typed;

pub use command::{parse_progress_line, CommandStage, EXIT_INVALID_INPUT, EXIT_TEMPFAIL};
pub use list::StageList;
pub use typed::{Typed, TypedStage};

use crate::cancellation::CancellationToken;
use crate::core::StageValue;
use crate::errors::StageError;
use crate::progress::StageProgress;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
///
/// `execute` must be idempotent with respect to side effects: a stage
/// re-invoked after a partial failure writes to the same topic- or
/// content-addressed locations and must not corrupt artifacts it already
/// produced.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage. Unique within a pipeline.
    fn name(&self) -> &str;

    /// Names the external dependency this stage calls, if any.
    ///
    /// Stages with a dependency are wrapped by the retry executor and its
    /// circuit breaker for that dependency.
    fn dependency(&self) -> Option<&str> {
        None
    }

    /// Checks the input before execution. `false` fails the run without retry.
    fn validate(&self, _input: &StageValue) -> bool {
        true
    }

    /// Executes the stage.
    ///
    /// # Arguments
    ///
    /// * `input` - The previous stage's output (the topic for the first stage)
    /// * `progress` - Handle for stage-local progress updates
    /// * `cancel` - Token to observe promptly during long waits
    async fn execute(
        &self,
        input: &StageValue,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> Result<StageValue, StageError>;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&StageValue) -> Result<StageValue, StageError> + Send + Sync,
{
    name: String,
    dependency: Option<String>,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageValue) -> Result<StageValue, StageError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            dependency: None,
            func,
        }
    }

    /// Declares the external dependency the function calls.
    #[must_use]
    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageValue) -> Result<StageValue, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("dependency", &self.dependency)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageValue) -> Result<StageValue, StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn dependency(&self) -> Option<&str> {
        self.dependency.as_deref()
    }

    async fn execute(
        &self,
        input: &StageValue,
        _progress: &StageProgress,
        _cancel: &CancellationToken,
    ) -> Result<StageValue, StageError> {
        (self.func)(input)
    }
}
