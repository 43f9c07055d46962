//! Stage doubles for pipeline tests.
//!
//! Every double counts its invocations so tests can assert exactly how
//! often the orchestrator called it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::{sleep_cancellable, CancellationToken};
use crate::core::StageValue;
use crate::errors::{ErrorKind, StageError};
use crate::progress::StageProgress;
use crate::stages::Stage;

/// Deterministic output used by the doubles: the input rendered as text
/// with `|<stage>` appended.
///
/// Chaining stages over the topic `cats` yields `cats|idea|script|...`.
#[must_use]
pub fn append_stage(input: &StageValue, stage_name: &str) -> StageValue {
    let prefix = match input {
        StageValue::String(s) => s.clone(),
        other => other.to_string(),
    };
    StageValue::String(format!("{prefix}|{stage_name}"))
}

/// A stage that succeeds, counting calls and recording inputs.
#[derive(Debug)]
pub struct CountingStage {
    name: String,
    dependency: Option<String>,
    calls: Arc<AtomicUsize>,
    inputs: Mutex<Vec<StageValue>>,
}

impl CountingStage {
    /// Creates a counting stage with a fresh counter.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_counter(name, Arc::new(AtomicUsize::new(0)))
    }

    /// Creates a counting stage sharing `counter`.
    ///
    /// Sharing a counter across stage instances lets a test rebuild the
    /// pipeline (as a restarted process would) and still see the totals.
    #[must_use]
    pub fn with_counter(name: impl Into<String>, counter: Arc<AtomicUsize>) -> Self {
        Self {
            name: name.into(),
            dependency: None,
            calls: counter,
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Declares an external dependency.
    #[must_use]
    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the shared counter.
    #[must_use]
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// Returns the inputs seen, in call order.
    #[must_use]
    pub fn inputs(&self) -> Vec<StageValue> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl Stage for CountingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependency(&self) -> Option<&str> {
        self.dependency.as_deref()
    }

    async fn execute(
        &self,
        input: &StageValue,
        progress: &StageProgress,
        _cancel: &CancellationToken,
    ) -> Result<StageValue, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(input.clone());
        progress.report(50.0, "working");
        Ok(append_stage(input, &self.name))
    }
}

/// A stage that fails transiently a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyStage {
    name: String,
    dependency: Option<String>,
    failures: usize,
    kind: ErrorKind,
    calls: Arc<AtomicUsize>,
}

impl FlakyStage {
    /// Creates a stage failing `failures` times with a server error.
    #[must_use]
    pub fn new(name: impl Into<String>, failures: usize) -> Self {
        Self {
            name: name.into(),
            dependency: None,
            failures,
            kind: ErrorKind::ServerError,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the error kind of the transient failures.
    #[must_use]
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Declares an external dependency.
    #[must_use]
    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for FlakyStage {
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
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(StageError::transient(
                self.kind,
                format!("{} unavailable (call {call})", self.name),
            ));
        }
        Ok(append_stage(input, &self.name))
    }
}

/// A stage that always fails with the same error.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    dependency: Option<String>,
    error: StageError,
    calls: Arc<AtomicUsize>,
}

impl FailingStage {
    /// Creates a stage failing with `error`.
    #[must_use]
    pub fn new(name: impl Into<String>, error: StageError) -> Self {
        Self {
            name: name.into(),
            dependency: None,
            error,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a stage failing with a fatal invalid-input error.
    #[must_use]
    pub fn fatal(name: impl Into<String>) -> Self {
        Self::new(name, StageError::invalid_input("rejected by upstream"))
    }

    /// Creates a stage failing with a transient server error.
    #[must_use]
    pub fn transient(name: impl Into<String>) -> Self {
        Self::new(name, StageError::transient(ErrorKind::ServerError, "upstream returned 503"))
    }

    /// Declares an external dependency.
    #[must_use]
    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependency(&self) -> Option<&str> {
        self.dependency.as_deref()
    }

    async fn execute(
        &self,
        _input: &StageValue,
        _progress: &StageProgress,
        _cancel: &CancellationToken,
    ) -> Result<StageValue, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// A stage that takes a while, reporting progress in steps.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
    steps: u32,
    observe_cancel: bool,
    calls: Arc<AtomicUsize>,
}

impl SlowStage {
    /// Creates a slow stage spreading `delay` over four progress steps.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            steps: 4,
            observe_cancel: true,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a slow stage with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }

    /// Makes the stage ignore its cancellation token.
    #[must_use]
    pub fn ignoring_cancellation(mut self) -> Self {
        self.observe_cancel = false;
        self
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        input: &StageValue,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> Result<StageValue, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.delay / self.steps.max(1);
        for i in 1..=self.steps {
            if self.observe_cancel {
                sleep_cancellable(cancel, step).await.map_err(StageError::cancelled)?;
            } else {
                tokio::time::sleep(step).await;
            }
            progress.report(f64::from(i * 100 / self.steps), format!("step {i}/{}", self.steps));
        }
        Ok(append_stage(input, &self.name))
    }
}

/// A stage that panics.
#[derive(Debug)]
pub struct PanickingStage {
    name: String,
}

impl PanickingStage {
    /// Creates a panicking stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for PanickingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _input: &StageValue,
        _progress: &StageProgress,
        _cancel: &CancellationToken,
    ) -> Result<StageValue, StageError> {
        panic!("{} blew up", self.name)
    }
}
