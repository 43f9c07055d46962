//! Test assertions for run outcomes.

use crate::core::{StageStatus, StageValue};
use crate::errors::FailureKind;
use crate::pipeline::{RunOutcome, RunReport, StageFailure};

/// Asserts that the run succeeded and returns its output.
#[track_caller]
pub fn assert_succeeded(outcome: &RunOutcome) -> &StageValue {
    match outcome {
        RunOutcome::Succeeded { output, .. } => output,
        other => panic!("Expected success, got {other:?}"),
    }
}

/// Asserts that the run failed at `stage` with `kind` and returns the failure.
#[track_caller]
pub fn assert_failed_at<'a>(outcome: &'a RunOutcome, stage: &str, kind: FailureKind) -> &'a StageFailure {
    match outcome {
        RunOutcome::Failed { failure, .. } => {
            assert_eq!(
                failure.stage.as_deref(),
                Some(stage),
                "Expected failure at stage '{stage}', got {failure:?}"
            );
            assert_eq!(failure.kind, kind, "Expected {kind} failure, got {failure:?}");
            failure
        }
        other => panic!("Expected failure at '{stage}', got {other:?}"),
    }
}

/// Asserts that the run was cancelled at `stage`.
#[track_caller]
pub fn assert_cancelled_at(outcome: &RunOutcome, stage: &str) {
    match outcome {
        RunOutcome::Cancelled { stage: actual, .. } => assert_eq!(
            actual, stage,
            "Expected cancellation at '{stage}', got '{actual}'"
        ),
        other => panic!("Expected cancellation at '{stage}', got {other:?}"),
    }
}

/// Asserts the status recorded for one stage.
#[track_caller]
pub fn assert_stage_status(report: &RunReport, stage: &str, expected: StageStatus) {
    let actual = report.stage(stage).map(|s| s.status);
    assert_eq!(
        actual,
        Some(expected),
        "Expected stage '{stage}' to be {expected:?}, got {actual:?}"
    );
}
