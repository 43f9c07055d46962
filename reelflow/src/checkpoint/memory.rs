//! In-memory checkpoint store.

use super::{decode_document, encode_document, validate_run_id, CheckpointStore, PipelineRun, StageCheckpoint};
use crate::errors::CheckpointError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Keeps encoded documents in memory.
///
/// Documents go through the same codec as the file store, so schema
/// handling behaves identically.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    documents: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    /// Returns true if no run is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }

    /// Stores raw bytes as a run's document, bypassing the encoder.
    pub fn insert_raw(&self, run_id: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.documents.lock().insert(run_id.into(), bytes.into());
    }

    fn read(&self, run_id: &str) -> Result<Option<PipelineRun>, CheckpointError> {
        validate_run_id(run_id)?;
        let bytes = self.documents.lock().get(run_id).cloned();
        bytes.map(|b| decode_document(run_id, &b)).transpose()
    }

    fn write(&self, run: &PipelineRun) -> Result<(), CheckpointError> {
        validate_run_id(&run.run_id)?;
        let bytes = encode_document(run)?;
        self.documents.lock().insert(run.run_id.clone(), bytes);
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, run_id: &str) -> Result<Option<PipelineRun>, CheckpointError> {
        self.read(run_id)
    }

    async fn create(&self, run: &PipelineRun) -> Result<(), CheckpointError> {
        self.write(run)
    }

    async fn save(&self, run_id: &str, checkpoint: &StageCheckpoint) -> Result<(), CheckpointError> {
        let mut run = self
            .read(run_id)?
            .unwrap_or_else(|| PipelineRun::new(run_id, String::new(), Vec::new()));
        run.upsert(checkpoint.clone());
        self.write(&run)
    }

    async fn delete(&self, run_id: &str) -> Result<(), CheckpointError> {
        validate_run_id(run_id)?;
        self.documents.lock().remove(run_id);
        Ok(())
    }

    async fn exists(&self, run_id: &str) -> Result<bool, CheckpointError> {
        validate_run_id(run_id)?;
        Ok(self.documents.lock().contains_key(run_id))
    }

    async fn list(&self) -> Result<Vec<String>, CheckpointError> {
        Ok(self.documents.lock().keys().cloned().collect())
    }
}
