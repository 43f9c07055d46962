//! Testing utilities for reelflow pipelines.
//!
//! This module provides:
//! - Stage doubles with call counters
//! - Assertions over run outcomes

mod assertions;
mod mocks;

pub use assertions::{assert_cancelled_at, assert_failed_at, assert_stage_status, assert_succeeded};
pub use mocks::{append_stage, CountingStage, FailingStage, FlakyStage, PanickingStage, SlowStage};
