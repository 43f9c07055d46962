//! Terminal results of a pipeline run.

use crate::core::{RunStatus, StageStatus, StageValue};
use crate::errors::FailureKind;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What happened to one stage during one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    /// The stage name.
    pub name: String,
    /// Final sub-state of the stage.
    pub status: StageStatus,
    /// Attempts consumed in this invocation, or recorded in the checkpoint
    /// when the stage was skipped.
    pub attempts: u32,
    /// Wall-clock time spent executing, zero when skipped.
    pub duration_ms: u64,
}

/// Summary of one invocation of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// The run id; stable across resumes.
    pub run_id: String,
    /// Unique id of this invocation.
    pub execution_id: Uuid,
    /// The topic.
    pub topic: String,
    /// Whether an existing checkpoint was resumed.
    pub resumed: bool,
    /// Terminal run status.
    pub status: RunStatus,
    /// Per-stage results in pipeline order.
    pub stages: Vec<StageReport>,
    /// Whether a checkpoint remains for a later resume.
    pub checkpoint_retained: bool,
    /// When this invocation started.
    pub started_at: Timestamp,
    /// Total wall-clock time of this invocation.
    pub duration_ms: u64,
}

impl RunReport {
    pub(crate) fn new(run_id: &str, execution_id: Uuid, topic: &str, stage_names: &[String]) -> Self {
        Self {
            run_id: run_id.to_string(),
            execution_id,
            topic: topic.to_string(),
            resumed: false,
            status: RunStatus::NotStarted,
            stages: stage_names
                .iter()
                .map(|name| StageReport {
                    name: name.clone(),
                    status: StageStatus::Pending,
                    attempts: 0,
                    duration_ms: 0,
                })
                .collect(),
            checkpoint_retained: false,
            started_at: chrono::Utc::now(),
            duration_ms: 0,
        }
    }

    /// Returns the report for `name`.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub(crate) fn stage_mut(&mut self, index: usize) -> Option<&mut StageReport> {
        self.stages.get_mut(index)
    }

    /// Names of stages with the given status, in pipeline order.
    #[must_use]
    pub fn stages_with(&self, status: StageStatus) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Names of stages executed to completion in this invocation.
    #[must_use]
    pub fn executed(&self) -> Vec<&str> {
        self.stages_with(StageStatus::Completed)
    }

    /// Names of stages skipped because a checkpoint existed.
    #[must_use]
    pub fn skipped(&self) -> Vec<&str> {
        self.stages_with(StageStatus::Skipped)
    }
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    /// The failing stage, or `None` when the run failed before any stage
    /// (e.g. an unreadable checkpoint).
    pub stage: Option<String>,
    /// Taxonomy kind.
    pub kind: FailureKind,
    /// Human-readable detail.
    pub message: String,
    /// Whether a checkpoint remains for resume.
    pub checkpoint_retained: bool,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stage {
            Some(stage) => write!(f, "stage '{stage}' failed ({}): {}", self.kind, self.message)?,
            None => write!(f, "run failed ({}): {}", self.kind, self.message)?,
        }
        if self.checkpoint_retained {
            write!(f, " [checkpoint kept; rerun with --resume]")?;
        }
        Ok(())
    }
}

/// Terminal outcome of [`super::PipelineOrchestrator::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every stage completed; the checkpoint was deleted.
    Succeeded {
        /// Output of the final stage.
        output: StageValue,
        /// Run summary.
        report: RunReport,
    },
    /// A stage failed terminally; the checkpoint is left intact.
    Failed {
        /// What failed and why.
        failure: StageFailure,
        /// Run summary.
        report: RunReport,
    },
    /// Cancellation was observed; the checkpoint is left intact.
    Cancelled {
        /// The stage that was interrupted or would have run next.
        stage: String,
        /// Run summary.
        report: RunReport,
    },
}

impl RunOutcome {
    /// Returns the terminal run status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Succeeded { .. } => RunStatus::Succeeded,
            Self::Failed { .. } => RunStatus::Failed,
            Self::Cancelled { .. } => RunStatus::Cancelled,
        }
    }

    /// Returns the run summary.
    #[must_use]
    pub fn report(&self) -> &RunReport {
        match self {
            Self::Succeeded { report, .. } | Self::Failed { report, .. } | Self::Cancelled { report, .. } => {
                report
            }
        }
    }

    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Returns the final output, if the run succeeded.
    #[must_use]
    pub fn output(&self) -> Option<&StageValue> {
        match self {
            Self::Succeeded { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Returns the failure, if the run failed.
    #[must_use]
    pub fn failure(&self) -> Option<&StageFailure> {
        match self {
            Self::Failed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}
