//! Checkpoint document model and schema migration.

use crate::core::StageValue;
use crate::errors::CheckpointError;
use crate::utils::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Newest checkpoint schema this build reads and writes.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Durable record of one completed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCheckpoint {
    /// The stage name; unique within a run.
    pub stage_name: String,
    /// When the stage completed.
    pub completed_at: Timestamp,
    /// The stage output, sufficient as the next stage's input.
    pub output_ref: StageValue,
    /// Attempts consumed, starting at 1.
    pub attempt: u32,
}

impl StageCheckpoint {
    /// Records a completion now.
    #[must_use]
    pub fn new(stage_name: impl Into<String>, output_ref: StageValue, attempt: u32) -> Self {
        Self {
            stage_name: stage_name.into(),
            completed_at: Utc::now(),
            output_ref,
            attempt,
        }
    }
}

/// One execution attempt of a pipeline for one content item, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    /// Schema of the document.
    pub schema_version: u32,
    /// The run id.
    pub run_id: String,
    /// The topic the run produces content for.
    #[serde(default)]
    pub topic: String,
    /// When the run was first started.
    pub created_at: Timestamp,
    /// Ordered stage names at the time the run started.
    #[serde(default)]
    pub stages: Vec<String>,
    /// Index of the next stage to run.
    #[serde(default)]
    pub current_stage_index: usize,
    /// Completed stages in completion order.
    #[serde(default)]
    pub completed_stages: Vec<StageCheckpoint>,
}

impl PipelineRun {
    /// Creates a fresh run with no completed stages.
    #[must_use]
    pub fn new(run_id: impl Into<String>, topic: impl Into<String>, stages: Vec<String>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id: run_id.into(),
            topic: topic.into(),
            created_at: Utc::now(),
            stages,
            current_stage_index: 0,
            completed_stages: Vec::new(),
        }
    }

    /// Returns the checkpoint for `stage_name`, if it completed.
    #[must_use]
    pub fn checkpoint(&self, stage_name: &str) -> Option<&StageCheckpoint> {
        self.completed_stages.iter().find(|c| c.stage_name == stage_name)
    }

    /// Returns true if `stage_name` has a checkpoint.
    #[must_use]
    pub fn is_completed(&self, stage_name: &str) -> bool {
        self.checkpoint(stage_name).is_some()
    }

    /// Returns the names of completed stages in completion order.
    #[must_use]
    pub fn completed_names(&self) -> Vec<&str> {
        self.completed_stages.iter().map(|c| c.stage_name.as_str()).collect()
    }

    /// Inserts or replaces the checkpoint keyed by its stage name.
    pub fn upsert(&mut self, checkpoint: StageCheckpoint) {
        if !self.stages.contains(&checkpoint.stage_name) {
            self.stages.push(checkpoint.stage_name.clone());
        }
        match self
            .completed_stages
            .iter_mut()
            .find(|c| c.stage_name == checkpoint.stage_name)
        {
            Some(existing) => *existing = checkpoint,
            None => self.completed_stages.push(checkpoint),
        }
        self.sync_stage_index();
    }

    /// Points `current_stage_index` at the first stage without a checkpoint.
    pub fn sync_stage_index(&mut self) {
        let next = self
            .stages
            .iter()
            .position(|s| !self.is_completed(s))
            .unwrap_or(self.stages.len());
        self.current_stage_index = next;
    }
}

#[derive(Debug, Deserialize)]
struct VersionProbe {
    #[serde(rename = "schemaVersion", default = "legacy_version")]
    schema_version: u32,
}

const fn legacy_version() -> u32 {
    1
}

/// The first schema: only the minimum fields.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineRunV1 {
    run_id: String,
    created_at: Timestamp,
    #[serde(default)]
    completed_stages: Vec<StageCheckpoint>,
}

impl From<PipelineRunV1> for PipelineRun {
    fn from(v1: PipelineRunV1) -> Self {
        let stages: Vec<String> = v1
            .completed_stages
            .iter()
            .map(|c| c.stage_name.clone())
            .collect();
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id: v1.run_id,
            topic: String::new(),
            created_at: v1.created_at,
            current_stage_index: stages.len(),
            stages,
            completed_stages: v1.completed_stages,
        }
    }
}

/// Decodes a checkpoint document, migrating older schemas.
///
/// # Errors
///
/// `Incompatible` when the document is newer than [`CURRENT_SCHEMA_VERSION`],
/// `Serialization` when it is not a valid document.
pub fn decode_document(run_id: &str, bytes: &[u8]) -> Result<PipelineRun, CheckpointError> {
    let serialization = |source| CheckpointError::Serialization {
        run_id: run_id.to_string(),
        source,
    };
    let probe: VersionProbe = serde_json::from_slice(bytes).map_err(serialization)?;

    match probe.schema_version {
        v if v > CURRENT_SCHEMA_VERSION => Err(CheckpointError::Incompatible {
            run_id: run_id.to_string(),
            found: v,
            supported: CURRENT_SCHEMA_VERSION,
        }),
        0 | 1 => {
            let legacy: PipelineRunV1 = serde_json::from_slice(bytes).map_err(serialization)?;
            tracing::info!(run_id = %run_id, from = probe.schema_version, to = CURRENT_SCHEMA_VERSION, "Migrated checkpoint schema");
            Ok(legacy.into())
        }
        _ => serde_json::from_slice(bytes).map_err(serialization),
    }
}

/// Encodes a checkpoint document at the current schema.
///
/// # Errors
///
/// `Serialization` if an output cannot be encoded.
pub fn encode_document(run: &PipelineRun) -> Result<Vec<u8>, CheckpointError> {
    let mut current = run.clone();
    current.schema_version = CURRENT_SCHEMA_VERSION;
    serde_json::to_vec_pretty(&current).map_err(|source| CheckpointError::Serialization {
        run_id: run.run_id.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn stages() -> Vec<String> {
        ["idea", "script", "voice"].iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_upsert_is_keyed_by_stage_name() {
        let mut run = PipelineRun::new("run-1", "cats", stages());
        run.upsert(StageCheckpoint::new("idea", json!("v1"), 1));
        run.upsert(StageCheckpoint::new("idea", json!("v2"), 2));

        assert_eq!(run.completed_stages.len(), 1);
        assert_eq!(run.checkpoint("idea").unwrap().output_ref, json!("v2"));
        assert_eq!(run.checkpoint("idea").unwrap().attempt, 2);
        assert_eq!(run.current_stage_index, 1);
    }

    #[test]
    fn test_upsert_advances_index() {
        let mut run = PipelineRun::new("run-1", "cats", stages());
        run.upsert(StageCheckpoint::new("idea", json!(1), 1));
        run.upsert(StageCheckpoint::new("script", json!(2), 1));
        assert_eq!(run.current_stage_index, 2);
        assert_eq!(run.completed_names(), vec!["idea", "script"]);
        assert!(!run.is_completed("voice"));
    }

    #[test]
    fn test_index_follows_first_gap_after_stage_change() {
        let mut run = PipelineRun::new("run-1", "cats", stages());
        run.upsert(StageCheckpoint::new("idea", json!(1), 1));
        run.upsert(StageCheckpoint::new("script", json!(2), 1));
        assert_eq!(run.current_stage_index, 2);

        run.stages = ["idea", "outline", "script", "voice"].iter().map(|s| (*s).to_string()).collect();
        run.sync_stage_index();
        assert_eq!(run.current_stage_index, 1);

        run.upsert(StageCheckpoint::new("voice", json!(3), 1));
        assert_eq!(run.current_stage_index, 1);
    }

    #[test]
    fn test_document_uses_camel_case_fields() {
        let mut run = PipelineRun::new("run-1", "cats", stages());
        run.upsert(StageCheckpoint::new("idea", json!({"idea": "cats"}), 1));
        let doc: serde_json::Value = serde_json::from_slice(&encode_document(&run).unwrap()).unwrap();

        assert_eq!(doc["schemaVersion"], json!(CURRENT_SCHEMA_VERSION));
        assert_eq!(doc["runId"], json!("run-1"));
        assert_eq!(doc["currentStageIndex"], json!(1));
        assert_eq!(doc["completedStages"][0]["stageName"], json!("idea"));
        assert_eq!(doc["completedStages"][0]["outputRef"], json!({"idea": "cats"}));
        assert_eq!(doc["completedStages"][0]["attempt"], json!(1));
        assert!(doc["createdAt"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_decode_current_document() {
        let mut run = PipelineRun::new("run-1", "cats", stages());
        run.upsert(StageCheckpoint::new("idea", json!("x"), 1));
        let decoded = decode_document("run-1", &encode_document(&run).unwrap()).unwrap();
        assert_eq!(decoded, run);
    }

    #[test]
    fn test_migrates_v1_document() {
        let v1 = json!({
            "schemaVersion": 1,
            "runId": "run-old",
            "createdAt": "2024-03-01T10:00:00Z",
            "completedStages": [
                {"stageName": "idea", "completedAt": "2024-03-01T10:01:00Z", "outputRef": "an idea", "attempt": 1},
                {"stageName": "script", "completedAt": "2024-03-01T10:02:00Z", "outputRef": {"lines": []}, "attempt": 2}
            ]
        });
        let run = decode_document("run-old", v1.to_string().as_bytes()).unwrap();

        assert_eq!(run.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(run.stages, vec!["idea".to_string(), "script".to_string()]);
        assert_eq!(run.current_stage_index, 2);
        assert_eq!(run.checkpoint("script").unwrap().attempt, 2);
        assert!(run.topic.is_empty());
    }

    #[test]
    fn test_missing_version_is_treated_as_v1() {
        let doc = json!({ "runId": "r", "createdAt": "2024-03-01T10:00:00Z" });
        let run = decode_document("r", doc.to_string().as_bytes()).unwrap();
        assert!(run.completed_stages.is_empty());
        assert_eq!(run.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_version_is_incompatible() {
        let doc = json!({ "schemaVersion": 99, "runId": "r", "createdAt": "2024-03-01T10:00:00Z" });
        let err = decode_document("r", doc.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, CheckpointError::Incompatible { found: 99, supported: CURRENT_SCHEMA_VERSION, .. }));
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        let err = decode_document("r", b"{ not json").unwrap_err();
        assert!(matches!(err, CheckpointError::Serialization { .. }));
    }
}
