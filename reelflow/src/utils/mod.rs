//! Run identity and timestamp helpers.

mod run_id;
pub mod timestamps;

pub use run_id::{is_valid_run_id, run_id_for_topic, slugify, MAX_SLUG_LEN};
pub use timestamps::{format_iso8601, iso_timestamp, now_utc, Timestamp};

use uuid::Uuid;

/// Generates a time-ordered id for one invocation of a run.
///
/// A run keeps its run id across resumes; each invocation gets a fresh
/// execution id so log lines from separate attempts can be told apart.
#[must_use]
pub fn generate_execution_id() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_ids_are_v7_and_distinct() {
        let a = generate_execution_id();
        let b = generate_execution_id();
        assert_eq!(a.get_version_num(), 7);
        assert_ne!(a, b);
    }
}
