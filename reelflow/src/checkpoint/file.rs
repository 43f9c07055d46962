//! Filesystem checkpoint store.

use super::{decode_document, encode_document, validate_run_id, CheckpointStore, PipelineRun, StageCheckpoint};
use crate::errors::CheckpointError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const EXTENSION: &str = "json";

/// Stores each run as `<dir>/<run_id>.json`.
///
/// Writes go to `<run_id>.json.tmp`, are flushed to disk, then renamed over
/// the canonical file.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the canonical path of a run's document.
    pub fn path_for(&self, run_id: &str) -> Result<PathBuf, CheckpointError> {
        validate_run_id(run_id)?;
        Ok(self.dir.join(format!("{run_id}.{EXTENSION}")))
    }

    async fn read(&self, run_id: &str) -> Result<Option<PipelineRun>, CheckpointError> {
        let path = self.path_for(run_id)?;
        match fs::read(&path).await {
            Ok(bytes) => decode_document(run_id, &bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(&self, run: &PipelineRun) -> Result<(), CheckpointError> {
        let path = self.path_for(&run.run_id)?;
        let bytes = encode_document(run)?;
        fs::create_dir_all(&self.dir).await?;

        let temp_path = self.dir.join(format!("{}.{EXTENSION}.tmp", run.run_id));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, &path).await?;
        sync_dir(&self.dir).await;

        debug!(
            run_id = %run.run_id,
            completed = run.completed_stages.len(),
            path = %path.display(),
            "Checkpoint written"
        );
        Ok(())
    }
}

/// Flushes the directory entry so the rename survives a power loss.
#[cfg(unix)]
async fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir).await {
        let _ = handle.sync_all().await;
    }
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) {}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, run_id: &str) -> Result<Option<PipelineRun>, CheckpointError> {
        self.read(run_id).await
    }

    async fn create(&self, run: &PipelineRun) -> Result<(), CheckpointError> {
        self.write_atomic(run).await
    }

    async fn save(&self, run_id: &str, checkpoint: &StageCheckpoint) -> Result<(), CheckpointError> {
        let mut run = self
            .read(run_id)
            .await?
            .unwrap_or_else(|| PipelineRun::new(run_id, String::new(), Vec::new()));
        run.upsert(checkpoint.clone());
        self.write_atomic(&run).await
    }

    async fn delete(&self, run_id: &str) -> Result<(), CheckpointError> {
        let path = self.path_for(run_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(run_id = %run_id, "Checkpoint deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, run_id: &str) -> Result<bool, CheckpointError> {
        let path = self.path_for(run_id)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn list(&self) -> Result<Vec<String>, CheckpointError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut run_ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_run_id(stem).is_ok() {
                    run_ids.push(stem.to_string());
                }
            }
        }
        run_ids.sort();
        Ok(run_ids)
    }
}
