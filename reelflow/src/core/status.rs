//! Run and stage status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a pipeline run.
///
/// `NotStarted -> Running -> {Succeeded, Failed, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run has not begun.
    #[default]
    NotStarted,
    /// Stages are being visited.
    Running,
    /// Every stage completed; the checkpoint was deleted.
    Succeeded,
    /// A stage failed terminally; the checkpoint was retained.
    Failed,
    /// Cancellation was observed; the checkpoint was retained.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RunStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Running)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled)
                | (Self::NotStarted, Self::Failed | Self::Cancelled)
        )
    }
}

/// Per-stage sub-state within a running pipeline.
///
/// `Pending -> Executing -> {Completed, Skipped}`; `Failed` and `Cancelled`
/// record where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not been visited yet.
    #[default]
    Pending,
    /// Stage is running.
    Executing,
    /// Stage ran and its checkpoint is durable.
    Completed,
    /// Stage was satisfied from an existing checkpoint.
    Skipped,
    /// Stage failed terminally.
    Failed,
    /// Stage was interrupted by cancellation.
    Cancelled,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Executing => write!(f, "executing"),
            Self::Completed => write!(f, "completed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StageStatus {
    /// Returns true if the stage's output is available downstream.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Executing)
    }
}
