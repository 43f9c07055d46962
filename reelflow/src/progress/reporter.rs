//! Progress reporter and the per-stage handle stages receive.

use super::{NoOpProgressSink, ProgressEvent, ProgressSink};
use std::sync::Arc;
use tracing::warn;

/// Computes overall completion for a run.
///
/// `(completed_stages + stage_fraction) / total_stages * 100`, clamped to
/// `0..=100`. An empty pipeline is reported as complete.
#[must_use]
pub fn overall_percent(completed_stages: usize, stage_percent: f64, total_stages: usize) -> f64 {
    if total_stages == 0 {
        return 100.0;
    }
    let fraction = clamp_percent(stage_percent) / 100.0;
    #[allow(clippy::cast_precision_loss)]
    let overall = (completed_stages as f64 + fraction) / total_stages as f64 * 100.0;
    clamp_percent(overall)
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Fire-and-forget front end over a [`ProgressSink`].
///
/// A sink that panics is contained here; the stage never sees it.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(Arc::new(NoOpProgressSink))
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

impl ProgressReporter {
    /// Creates a reporter over `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink }
    }

    /// Reports an update for `stage_name`; the percentage is passed through.
    pub fn report(&self, stage_name: &str, percent_complete: f64, message: impl Into<String>) {
        let pct = clamp_percent(percent_complete);
        self.forward(ProgressEvent {
            stage_name: stage_name.to_string(),
            percent_complete: pct,
            stage_percent: pct,
            message: message.into(),
        });
    }

    fn forward(&self, event: ProgressEvent) {
        let sink = &self.sink;
        if let Err(e) =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink.report(event)))
        {
            warn!("Progress sink panicked: {:?}", e);
        }
    }

    /// Builds the handle passed to the stage at `index` of `total`.
    #[must_use]
    pub fn for_stage(&self, stage_name: &str, completed_stages: usize, total_stages: usize) -> StageProgress {
        StageProgress {
            reporter: self.clone(),
            stage_name: stage_name.to_string(),
            completed_stages,
            total_stages,
        }
    }
}

/// Progress handle scoped to one stage of one run.
#[derive(Debug, Clone)]
pub struct StageProgress {
    reporter: ProgressReporter,
    stage_name: String,
    completed_stages: usize,
    total_stages: usize,
}

impl StageProgress {
    /// A handle that discards everything, for calling stages directly.
    #[must_use]
    pub fn detached(stage_name: impl Into<String>) -> Self {
        Self {
            reporter: ProgressReporter::default(),
            stage_name: stage_name.into(),
            completed_stages: 0,
            total_stages: 1,
        }
    }

    /// Returns the stage this handle reports for.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Reports stage-local completion in `0..=100` with a message.
    pub fn report(&self, stage_percent: f64, message: impl Into<String>) {
        let stage_percent = clamp_percent(stage_percent);
        self.reporter.forward(ProgressEvent {
            stage_name: self.stage_name.clone(),
            percent_complete: overall_percent(self.completed_stages, stage_percent, self.total_stages),
            stage_percent,
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::CollectingProgressSink;

    #[test]
    fn test_overall_percent() {
        assert!((overall_percent(0, 0.0, 5) - 0.0).abs() < f64::EPSILON);
        assert!((overall_percent(2, 50.0, 5) - 50.0).abs() < 1e-9);
        assert!((overall_percent(5, 0.0, 5) - 100.0).abs() < 1e-9);
        assert!((overall_percent(0, 0.0, 0) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overall_percent_clamps_input() {
        assert!((overall_percent(1, 250.0, 4) - 50.0).abs() < 1e-9);
        assert!((overall_percent(1, -10.0, 4) - 25.0).abs() < 1e-9);
        assert!((overall_percent(0, f64::NAN, 4) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stage_progress_forwards_overall() {
        let sink = Arc::new(CollectingProgressSink::new());
        let reporter = ProgressReporter::new(sink.clone());
        let progress = reporter.for_stage("voice", 2, 5);

        progress.report(50.0, "half way");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage_name, "voice");
        assert!((events[0].percent_complete - 50.0).abs() < 1e-9);
        assert!((events[0].stage_percent - 50.0).abs() < 1e-9);
        assert_eq!(events[0].message, "half way");
    }

    struct PanickingSink;

    impl ProgressSink for PanickingSink {
        fn report(&self, _event: ProgressEvent) {
            panic!("sink exploded");
        }
    }

    #[test]
    fn test_panicking_sink_is_contained() {
        let reporter = ProgressReporter::new(Arc::new(PanickingSink));
        reporter.report("idea", 10.0, "still fine");
        reporter.for_stage("idea", 0, 1).report(20.0, "still fine");
    }

    #[test]
    fn test_detached_progress() {
        let progress = StageProgress::detached("script");
        assert_eq!(progress.stage_name(), "script");
        progress.report(10.0, "ignored");
    }
}
