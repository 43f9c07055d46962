//! The pipeline state machine.
//!
//! A run visits its stages strictly in order. Stages with a checkpoint are
//! skipped and their recorded output is passed forward; the first stage
//! without one and everything after it executes. Each completed stage is
//! checkpointed before the next one starts, so a crash can never leave a
//! later stage recorded without its predecessor.

use super::outcome::{RunOutcome, RunReport, StageFailure};
use crate::cancellation::{run_cancellable, CancellationToken};
use crate::checkpoint::{CheckpointStore, PipelineRun, StageCheckpoint};
use crate::core::{RunStatus, StageStatus, StageValue};
use crate::errors::{CheckpointError, ErrorKind, FailureKind, ResilienceError, StageError};
use crate::progress::{ProgressReporter, StageProgress};
use crate::resilience::{Attempted, RetryExecutor};
use crate::stages::{Stage, StageList};
use crate::utils::{generate_execution_id, run_id_for_topic};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Why a stage did not complete.
#[derive(Debug)]
enum StageFault {
    Failed {
        kind: FailureKind,
        message: String,
        attempts: u32,
    },
    Cancelled {
        reason: String,
        attempts: u32,
    },
}

impl StageFault {
    fn from_stage_error(err: StageError, attempts: u32) -> Self {
        match err {
            StageError::Cancelled { reason } => Self::Cancelled { reason, attempts },
            other => Self::Failed {
                kind: FailureKind::from(&other),
                message: other.to_string(),
                attempts,
            },
        }
    }
}

impl From<ResilienceError> for StageFault {
    fn from(err: ResilienceError) -> Self {
        let attempts = err.attempts();
        match err {
            ResilienceError::Cancelled { reason, .. } => Self::Cancelled { reason, attempts },
            other => Self::Failed {
                kind: other.failure_kind(),
                message: other.to_string(),
                attempts,
            },
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Calls the stage once, turning a panic into a fatal error.
async fn invoke(
    stage: &dyn Stage,
    input: &StageValue,
    progress: &StageProgress,
    cancel: &CancellationToken,
) -> Result<StageValue, StageError> {
    match AssertUnwindSafe(stage.execute(input, progress, cancel))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(stage = %stage.name(), panic = %message, "Stage panicked");
            Err(StageError::fatal(ErrorKind::Internal, format!("stage panicked: {message}")))
        }
    }
}

fn finish(report: &mut RunReport, status: RunStatus, started: Instant, checkpoint_retained: bool) {
    debug_assert!(report.status.can_transition_to(status));
    report.status = status;
    report.checkpoint_retained = checkpoint_retained;
    report.duration_ms = millis(started.elapsed());
}

fn mark(report: &mut RunReport, index: usize, status: StageStatus, attempts: u32, duration_ms: u64) {
    if let Some(entry) = report.stage_mut(index) {
        entry.status = status;
        entry.attempts = attempts;
        entry.duration_ms = duration_ms;
    }
}

/// Runs an ordered list of stages with checkpointing, resume, retries and
/// progress reporting.
///
/// Orchestrators are cheap to clone. Clones share the checkpoint store and
/// the executor's breaker registry, so concurrent runs of different topics
/// see one breaker per dependency.
#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    name: String,
    stages: StageList,
    store: Arc<dyn CheckpointStore>,
    executor: RetryExecutor,
    progress: ProgressReporter,
}

impl PipelineOrchestrator {
    pub(crate) fn new(
        name: String,
        stages: StageList,
        store: Arc<dyn CheckpointStore>,
        executor: RetryExecutor,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            name,
            stages,
            store,
            executor,
            progress,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.names()
    }

    /// Returns the checkpoint store.
    #[must_use]
    pub fn checkpoint_store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Returns the retry executor.
    #[must_use]
    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Loads the checkpoint of `run_id`, if any.
    pub async fn checkpoint(&self, run_id: &str) -> Result<Option<PipelineRun>, CheckpointError> {
        self.store.load(run_id).await
    }

    /// Runs the pipeline for `topic` under the run id derived from it.
    ///
    /// With `resume`, an existing checkpoint is continued; otherwise any
    /// checkpoint for the topic is replaced and every stage executes.
    pub async fn run(&self, topic: &str, resume: bool, cancel: &CancellationToken) -> RunOutcome {
        let run_id = run_id_for_topic(topic);
        self.run_with_id(&run_id, topic, resume, cancel).await
    }

    /// Runs the pipeline under an explicit run id.
    pub async fn run_with_id(
        &self,
        run_id: &str,
        topic: &str,
        resume: bool,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let execution_id = generate_execution_id();
        let span = info_span!(
            "pipeline_run",
            pipeline = %self.name,
            run_id = %run_id,
            topic = %topic,
            execution_id = %execution_id,
        );
        self.drive(run_id, topic, resume, cancel, execution_id)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        run_id: &str,
        topic: &str,
        resume: bool,
        cancel: &CancellationToken,
        execution_id: Uuid,
    ) -> RunOutcome {
        let started = Instant::now();
        let names = self.stages.names();
        let total = names.len();
        let mut report = RunReport::new(run_id, execution_id, topic, &names);
        report.status = RunStatus::Running;
        info!(stages = total, resume, "Pipeline run started");

        let mut run = match self.prepare(run_id, topic, resume, &names).await {
            Ok((run, resumed)) => {
                report.resumed = resumed;
                run
            }
            Err(err) => {
                error!(error = %err, "Cannot prepare checkpoint");
                let retained = self.store.exists(run_id).await.unwrap_or(false);
                let failure = StageFailure {
                    stage: None,
                    kind: err.failure_kind(),
                    message: err.to_string(),
                    checkpoint_retained: retained,
                };
                return Self::failed(report, started, failure);
            }
        };

        let resume_at = self
            .stages
            .iter()
            .position(|s| !run.is_completed(s.name()))
            .unwrap_or(total);
        let mut input = StageValue::String(topic.to_string());

        for (index, stage) in self.stages.iter().enumerate().take(resume_at) {
            let Some(checkpoint) = run.checkpoint(stage.name()) else {
                continue;
            };
            input = checkpoint.output_ref.clone();
            mark(&mut report, index, StageStatus::Skipped, checkpoint.attempt, 0);
            info!(stage = %stage.name(), index, attempt = checkpoint.attempt, "Stage skipped; checkpoint found");
            self.progress
                .for_stage(stage.name(), index, total)
                .report(100.0, "skipped (checkpoint)");
        }

        for (index, stage) in self.stages.iter().enumerate().skip(resume_at) {
            let name = stage.name();
            if cancel.is_cancelled() {
                return Self::cancelled(report, started, name, &cancel.reason_or_default());
            }

            let span = info_span!("stage", stage = %name, index);
            let progress = self.progress.for_stage(name, index, total);
            mark(&mut report, index, StageStatus::Executing, 0, 0);
            let stage_started = Instant::now();

            let result = self
                .execute_stage(stage.as_ref(), &input, &progress, cancel)
                .instrument(span.clone())
                .await;
            let elapsed = millis(stage_started.elapsed());

            let Attempted { value, attempts } = match result {
                Ok(attempted) => attempted,
                Err(StageFault::Cancelled { reason, attempts }) => {
                    mark(&mut report, index, StageStatus::Cancelled, attempts, elapsed);
                    return Self::cancelled(report, started, name, &reason);
                }
                Err(StageFault::Failed { kind, message, attempts }) => {
                    mark(&mut report, index, StageStatus::Failed, attempts, elapsed);
                    let failure = StageFailure {
                        stage: Some(name.to_string()),
                        kind,
                        message,
                        checkpoint_retained: true,
                    };
                    return Self::failed(report, started, failure);
                }
            };

            let checkpoint = StageCheckpoint::new(name, value.clone(), attempts);
            if let Err(err) = self.store.save(run_id, &checkpoint).instrument(span.clone()).await {
                mark(&mut report, index, StageStatus::Failed, attempts, elapsed);
                let failure = StageFailure {
                    stage: Some(name.to_string()),
                    kind: err.failure_kind(),
                    message: format!("cannot persist checkpoint: {err}"),
                    checkpoint_retained: true,
                };
                return Self::failed(report, started, failure);
            }
            run.upsert(checkpoint);

            mark(&mut report, index, StageStatus::Completed, attempts, elapsed);
            span.in_scope(|| info!(attempts, duration_ms = elapsed, "Stage completed; checkpoint saved"));
            progress.report(100.0, "completed");
            input = value;
        }

        let retained = match self.store.delete(run_id).await {
            Ok(()) => false,
            Err(err) => {
                warn!(error = %err, "Run succeeded but its checkpoint could not be deleted");
                true
            }
        };
        finish(&mut report, RunStatus::Succeeded, started, retained);
        info!(
            duration_ms = report.duration_ms,
            executed = report.executed().len(),
            skipped = report.skipped().len(),
            "Pipeline run succeeded"
        );
        RunOutcome::Succeeded { output: input, report }
    }

    /// Loads or creates the run document. Returns it and whether it was resumed.
    async fn prepare(
        &self,
        run_id: &str,
        topic: &str,
        resume: bool,
        names: &[String],
    ) -> Result<(PipelineRun, bool), CheckpointError> {
        if resume {
            if let Some(mut run) = self.store.load(run_id).await? {
                info!(completed = ?run.completed_names(), "Resuming from checkpoint");
                if run.stages != names || run.topic != topic {
                    if !run.topic.is_empty() && run.topic != topic {
                        warn!(recorded = %run.topic, "Checkpoint was recorded for a different topic");
                    }
                    run.stages = names.to_vec();
                    run.topic = topic.to_string();
                    run.sync_stage_index();
                    self.store.create(&run).await?;
                }
                return Ok((run, true));
            }
            info!("No checkpoint to resume; starting fresh");
        } else if self.store.exists(run_id).await? {
            info!("Replacing existing checkpoint for a fresh run");
        }

        let run = PipelineRun::new(run_id, topic, names.to_vec());
        self.store.create(&run).await?;
        Ok((run, false))
    }

    async fn execute_stage(
        &self,
        stage: &dyn Stage,
        input: &StageValue,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> Result<Attempted<StageValue>, StageFault> {
        if !stage.validate(input) {
            warn!("Stage rejected its input");
            return Err(StageFault::Failed {
                kind: FailureKind::Fatal,
                message: format!("stage '{}' rejected its input", stage.name()),
                attempts: 0,
            });
        }

        progress.report(0.0, "started");
        match stage.dependency() {
            Some(dependency) => {
                debug!(dependency = %dependency, "Stage executing under retry policy");
                self.executor
                    .execute_with_resilience(dependency, cancel, |attempt| {
                        debug!(attempt, "Invoking stage");
                        invoke(stage, input, progress, cancel)
                    })
                    .await
                    .map_err(StageFault::from)
            }
            None => {
                debug!("Stage executing");
                match run_cancellable(cancel, invoke(stage, input, progress, cancel)).await {
                    Ok(Ok(value)) => Ok(Attempted { value, attempts: 1 }),
                    Ok(Err(err)) => Err(StageFault::from_stage_error(err, 1)),
                    Err(reason) => Err(StageFault::Cancelled { reason, attempts: 1 }),
                }
            }
        }
    }

    fn failed(mut report: RunReport, started: Instant, failure: StageFailure) -> RunOutcome {
        finish(&mut report, RunStatus::Failed, started, failure.checkpoint_retained);
        error!(
            stage = failure.stage.as_deref().unwrap_or("-"),
            kind = %failure.kind,
            message = %failure.message,
            checkpoint_retained = failure.checkpoint_retained,
            "Pipeline run failed"
        );
        RunOutcome::Failed { failure, report }
    }

    fn cancelled(mut report: RunReport, started: Instant, stage: &str, reason: &str) -> RunOutcome {
        finish(&mut report, RunStatus::Cancelled, started, true);
        warn!(stage = %stage, reason = %reason, "Pipeline run cancelled; checkpoint kept");
        RunOutcome::Cancelled {
            stage: stage.to_string(),
            report,
        }
    }
}
