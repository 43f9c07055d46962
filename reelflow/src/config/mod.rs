//! TOML configuration of stages, dependencies and policies.
//!
//! ```toml
//! checkpoint_dir = ".reelflow/checkpoints"
//!
//! [default_retry]
//! max_attempts = 3
//!
//! [[stages]]
//! name = "voice"
//! dependency = "tts"
//! command = ["python3", "stages/voice.py"]
//! timeout_secs = 600
//!
//! [dependencies.tts]
//! required_env = ["TTS_API_KEY"]
//!
//! [dependencies.tts.retry]
//! max_attempts = 5
//! ```

mod issues;

pub use issues::ConfigIssue;

use crate::checkpoint::FileCheckpointStore;
use crate::errors::ReelflowError;
use crate::pipeline::{PipelineBuilder, PipelineOrchestrator};
use crate::progress::ProgressSink;
use crate::resilience::{CircuitBreakerConfig, DependencyPolicy, ResiliencePolicies, RetryExecutor, RetryPolicy};
use crate::stages::{CommandStage, StageList};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default location of checkpoint documents.
pub const DEFAULT_CHECKPOINT_DIR: &str = ".reelflow/checkpoints";

/// Errors that can occur during config operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),

    /// The file is not valid TOML for this schema.
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The file does not exist.
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// A stage cannot be built from its entry.
    #[error("Invalid stage '{name}': {reason}")]
    InvalidStage {
        /// The stage name.
        name: String,
        /// What is wrong.
        reason: String,
    },

}

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

const fn enabled_by_default() -> bool {
    true
}

/// One `[[stages]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Stage name; the checkpoint key.
    pub name: String,
    /// Disabled stages are left out of the pipeline.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// External dependency the stage calls.
    #[serde(default)]
    pub dependency: Option<String>,
    /// Program and arguments.
    #[serde(default)]
    pub command: Vec<String>,
    /// Per-execution time limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One `[dependencies.<name>]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DependencyConfig {
    /// Environment variables holding credentials; each must be set and non-empty.
    pub required_env: Vec<String>,
    /// Retry override. Unset fields take the built-in defaults.
    pub retry: Option<RetryPolicy>,
    /// Breaker override.
    pub breaker: Option<CircuitBreakerConfig>,
}

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReelflowConfig {
    /// Directory for checkpoint documents.
    pub checkpoint_dir: PathBuf,
    /// Stages in execution order.
    pub stages: Vec<StageConfig>,
    /// Dependencies by name.
    pub dependencies: BTreeMap<String, DependencyConfig>,
    /// Retry policy for dependencies without an override.
    pub default_retry: RetryPolicy,
    /// Breaker thresholds for dependencies without an override.
    pub default_breaker: CircuitBreakerConfig,
}

impl Default for ReelflowConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            stages: Vec::new(),
            dependencies: BTreeMap::new(),
            default_retry: RetryPolicy::default(),
            default_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ReelflowConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Loads the config file at `path`.
    ///
    /// A relative `checkpoint_dir` is resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        if config.checkpoint_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.checkpoint_dir = parent.join(&config.checkpoint_dir);
            }
        }
        tracing::debug!(path = %path.display(), stages = config.stages.len(), "Config loaded");
        Ok(config)
    }

    /// Returns the enabled stage entries in order.
    pub fn enabled_stages(&self) -> impl Iterator<Item = &StageConfig> {
        self.stages.iter().filter(|s| s.enabled)
    }

    /// Lists every problem in the configuration, reading credentials from
    /// the process environment. Executes nothing.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        self.validate_with(|key| std::env::var(key).is_ok_and(|v| !v.trim().is_empty()))
    }

    /// Like [`Self::validate`], with `env_present` deciding whether a
    /// credential variable is set.
    #[must_use]
    pub fn validate_with(&self, env_present: impl Fn(&str) -> bool) -> Vec<ConfigIssue> {
        issues::collect(self, &env_present)
    }

    /// Builds the per-dependency policies.
    #[must_use]
    pub fn policies(&self) -> ResiliencePolicies {
        let default = DependencyPolicy::new(self.default_retry.clone(), self.default_breaker.clone());
        self.dependencies
            .iter()
            .fold(ResiliencePolicies::new(default), |policies, (name, dep)| {
                let policy = DependencyPolicy::new(
                    dep.retry.clone().unwrap_or_else(|| self.default_retry.clone()),
                    dep.breaker.clone().unwrap_or_else(|| self.default_breaker.clone()),
                );
                policies.with_dependency(name.clone(), policy)
            })
    }

    /// Builds command stages for the enabled entries.
    pub fn stage_list(&self) -> ConfigResult<StageList> {
        let mut list = StageList::new();
        for entry in self.enabled_stages() {
            let stage = CommandStage::from_argv(&entry.name, &entry.command).ok_or_else(|| {
                ConfigError::InvalidStage {
                    name: entry.name.clone(),
                    reason: "command is empty".to_string(),
                }
            })?;
            let stage = match &entry.dependency {
                Some(dependency) => stage.with_dependency(dependency),
                None => stage,
            };
            let stage = match entry.timeout_secs {
                Some(secs) => stage.with_timeout(Duration::from_secs(secs)),
                None => stage,
            };
            list.push(Arc::new(stage));
        }
        Ok(list)
    }

    /// Returns the file checkpoint store for `checkpoint_dir`.
    #[must_use]
    pub fn checkpoint_store(&self) -> FileCheckpointStore {
        FileCheckpointStore::new(&self.checkpoint_dir)
    }

    /// Assembles the orchestrator described by this configuration.
    pub fn build_pipeline(
        &self,
        name: &str,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<PipelineOrchestrator, ReelflowError> {
        let executor = RetryExecutor::new(Arc::new(self.policies()));
        Ok(PipelineBuilder::new(name)
            .stages(self.stage_list()?)
            .checkpoint_store(Arc::new(self.checkpoint_store()))
            .executor(executor)
            .progress_sink(progress)
            .build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::progress::NoOpProgressSink;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
checkpoint_dir = "/var/lib/reelflow"

[default_retry]
max_attempts = 4
base_delay_ms = 500

[default_breaker]
failure_threshold = 3

[[stages]]
name = "idea"
command = ["python3", "stages/idea.py"]
dependency = "llm"

[[stages]]
name = "voice"
command = ["python3", "stages/voice.py"]
dependency = "tts"
timeout_secs = 900

[[stages]]
name = "images"
enabled = false
command = ["python3", "stages/images.py"]

[dependencies.llm]
required_env = ["OPENAI_API_KEY"]

[dependencies.tts]
required_env = ["TTS_API_KEY"]

[dependencies.tts.retry]
max_attempts = 6
retryable_error_kinds = ["timeout", "rate_limited"]

[dependencies.tts.breaker]
cooldown_ms = 5000
"#;

    #[test]
    fn test_parse_sample() {
        let config = ReelflowConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.checkpoint_dir, PathBuf::from("/var/lib/reelflow"));
        assert_eq!(config.stages.len(), 3);
        assert!(!config.stages[2].enabled);
        assert_eq!(config.stages[1].timeout_secs, Some(900));
        assert_eq!(config.default_retry.max_attempts, 4);
        assert_eq!(config.default_retry.max_delay_ms, 30_000);

        let tts = &config.dependencies["tts"];
        assert_eq!(tts.required_env, vec!["TTS_API_KEY".to_string()]);
        assert_eq!(
            tts.retry.as_ref().unwrap().retryable_error_kinds,
            vec![ErrorKind::Timeout, ErrorKind::RateLimited]
        );
    }

    #[test]
    fn test_defaults() {
        let config = ReelflowConfig::from_toml_str("").unwrap();
        assert_eq!(config, ReelflowConfig::default());
        assert_eq!(config.checkpoint_dir, PathBuf::from(DEFAULT_CHECKPOINT_DIR));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = ReelflowConfig::from_toml_str("checkpoint_directory = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_policies_fall_back_to_defaults() {
        let config = ReelflowConfig::from_toml_str(SAMPLE).unwrap();
        let policies = config.policies();

        assert_eq!(policies.policy_for("tts").retry.max_attempts, 6);
        assert_eq!(policies.policy_for("tts").breaker.cooldown_ms, 5000);
        assert_eq!(policies.policy_for("llm").retry.max_attempts, 4);
        assert_eq!(policies.policy_for("llm").breaker.failure_threshold, 3);
        assert_eq!(policies.policy_for("unknown").retry.base_delay_ms, 500);
    }

    #[test]
    fn test_stage_list_omits_disabled() {
        let config = ReelflowConfig::from_toml_str(SAMPLE).unwrap();
        let list = config.stage_list().unwrap();
        assert_eq!(list.names(), vec!["idea".to_string(), "voice".to_string()]);
        assert_eq!(list.get(1).unwrap().dependency(), Some("tts"));
    }

    #[test]
    fn test_stage_list_rejects_empty_command() {
        let mut config = ReelflowConfig::from_toml_str(SAMPLE).unwrap();
        config.stages[0].command.clear();
        assert!(matches!(config.stage_list(), Err(ConfigError::InvalidStage { .. })));
    }

    #[test]
    fn test_build_pipeline() {
        let config = ReelflowConfig::from_toml_str(SAMPLE).unwrap();
        let pipeline = config.build_pipeline("reel", Arc::new(NoOpProgressSink)).unwrap();
        assert_eq!(pipeline.stage_names().len(), 2);
        assert_eq!(pipeline.executor().policies().policy_for("tts").retry.max_attempts, 6);
    }

    #[test]
    fn test_build_pipeline_errors() {
        let mut config = ReelflowConfig::from_toml_str(SAMPLE).unwrap();
        for stage in &mut config.stages {
            stage.enabled = false;
        }
        let err = config.build_pipeline("reel", Arc::new(NoOpProgressSink)).unwrap_err();
        assert!(matches!(err, ReelflowError::Validation(_)));

        let mut config = ReelflowConfig::from_toml_str(SAMPLE).unwrap();
        config.stages[0].command.clear();
        let err = config.build_pipeline("reel", Arc::new(NoOpProgressSink)).unwrap_err();
        assert!(matches!(err, ReelflowError::Config(ConfigError::InvalidStage { .. })));
    }

    #[test]
    fn test_load_resolves_relative_checkpoint_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reelflow.toml");
        fs::write(&path, "checkpoint_dir = \"state\"\n").unwrap();

        let config = ReelflowConfig::load(&path).unwrap();
        assert_eq!(config.checkpoint_dir, dir.path().join("state"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ReelflowConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
