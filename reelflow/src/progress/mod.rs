//! Progress reporting.
//!
//! Stages push percentage/message updates into a [`StageProgress`] handle.
//! The orchestrator builds one handle per stage that folds the stage-local
//! percentage into an overall figure before forwarding it to the caller's
//! [`ProgressSink`]. Reporting is fire-and-forget: it never blocks and never
//! propagates a sink failure back into the stage.

mod reporter;
mod sink;

pub use reporter::{overall_percent, ProgressReporter, StageProgress};
pub use sink::{
    ChannelProgressSink, CollectingProgressSink, FanoutProgressSink, LoggingProgressSink,
    NoOpProgressSink, ProgressSink,
};

use serde::{Deserialize, Serialize};

/// One progress update. Ephemeral; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The stage reporting.
    pub stage_name: String,
    /// Overall run completion, 0-100.
    pub percent_complete: f64,
    /// Completion of the reporting stage alone, 0-100.
    pub stage_percent: f64,
    /// Free-form status message.
    pub message: String,
}
