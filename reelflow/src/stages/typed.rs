//! Typed stages over the JSON handoff.
//!
//! Stage authors describe input and output as Rust types; [`Typed`] adapts
//! such a stage to the object-safe [`Stage`] trait the orchestrator drives.

use super::Stage;
use crate::cancellation::CancellationToken;
use crate::core::StageValue;
use crate::errors::{ErrorKind, StageError};
use crate::progress::StageProgress;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;

/// A stage with typed input and output.
#[async_trait]
pub trait TypedStage: Send + Sync + Debug {
    /// Input produced by the previous stage.
    type Input: DeserializeOwned + Send + Sync;
    /// Output handed to the next stage and persisted in the checkpoint.
    type Output: Serialize + Send;

    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Names the external dependency this stage calls, if any.
    fn dependency(&self) -> Option<&str> {
        None
    }

    /// Checks the decoded input.
    fn validate(&self, _input: &Self::Input) -> bool {
        true
    }

    /// Executes the stage.
    async fn execute(
        &self,
        input: Self::Input,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> Result<Self::Output, StageError>;
}

/// Adapter from [`TypedStage`] to [`Stage`].
#[derive(Debug, Clone)]
pub struct Typed<S>(pub S);

impl<S: TypedStage> Typed<S> {
    fn decode(&self, input: &StageValue) -> Result<S::Input, StageError> {
        S::Input::deserialize(input).map_err(|e| {
            StageError::invalid_input(format!("stage '{}' cannot decode its input: {e}", self.0.name()))
        })
    }
}

#[async_trait]
impl<S: TypedStage> Stage for Typed<S> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn dependency(&self) -> Option<&str> {
        self.0.dependency()
    }

    fn validate(&self, input: &StageValue) -> bool {
        self.decode(input).is_ok_and(|decoded| self.0.validate(&decoded))
    }

    async fn execute(
        &self,
        input: &StageValue,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> Result<StageValue, StageError> {
        let decoded = self.decode(input)?;
        let output = self.0.execute(decoded, progress, cancel).await?;
        serde_json::to_value(output).map_err(|e| {
            StageError::fatal(
                ErrorKind::Internal,
                format!("stage '{}' produced unserializable output: {e}", self.0.name()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Script {
        title: String,
        lines: Vec<String>,
    }

    #[derive(Debug, Serialize)]
    struct Narration {
        audio_path: String,
        line_count: usize,
    }

    #[derive(Debug)]
    struct NarrateStage;

    #[async_trait]
    impl TypedStage for NarrateStage {
        type Input = Script;
        type Output = Narration;

        fn name(&self) -> &str {
            "voice"
        }

        fn dependency(&self) -> Option<&str> {
            Some("tts")
        }

        fn validate(&self, input: &Script) -> bool {
            !input.lines.is_empty()
        }

        async fn execute(
            &self,
            input: Script,
            progress: &StageProgress,
            _cancel: &CancellationToken,
        ) -> Result<Narration, StageError> {
            progress.report(100.0, "narrated");
            Ok(Narration {
                audio_path: format!("out/{}.wav", input.title),
                line_count: input.lines.len(),
            })
        }
    }

    #[tokio::test]
    async fn test_typed_stage_roundtrip() {
        let stage = Typed(NarrateStage);
        let input = json!({ "title": "cats", "lines": ["meow", "purr"] });

        assert_eq!(Stage::name(&stage), "voice");
        assert_eq!(Stage::dependency(&stage), Some("tts"));
        assert!(Stage::validate(&stage, &input));

        let out = Stage::execute(&stage, &input, &StageProgress::detached("voice"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, json!({ "audio_path": "out/cats.wav", "line_count": 2 }));
    }

    #[tokio::test]
    async fn test_typed_stage_rejects_bad_input() {
        let stage = Typed(NarrateStage);
        let bad = json!({ "title": 3 });
        assert!(!Stage::validate(&stage, &bad));

        let err = Stage::execute(&stage, &bad, &StageProgress::detached("voice"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidInput));
    }

    #[test]
    fn test_typed_stage_custom_validate() {
        let stage = Typed(NarrateStage);
        assert!(!Stage::validate(&stage, &json!({ "title": "empty", "lines": [] })));
    }
}
