//! Error types for the reelflow orchestration core.
//!
//! The taxonomy separates what a stage reports ([`StageError`]) from what
//! the resilience layer decides ([`ResilienceError`]) and from what the
//! checkpoint store can fail with ([`CheckpointError`]). Every terminal
//! error a caller sees maps onto one [`FailureKind`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The main error type for reelflow operations outside of a run's outcome.
#[derive(Debug, Error)]
pub enum ReelflowError {
    /// A checkpoint could not be read or written.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    /// The pipeline definition is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The configuration could not be loaded or turned into stages.
    #[error("{0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Cause classification attached to stage failures.
///
/// Retry policies list the kinds they consider retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The dependency did not answer in time.
    Timeout,
    /// The dependency throttled the request.
    RateLimited,
    /// The dependency reported a server-side (5xx) error.
    ServerError,
    /// Connection-level failure.
    Network,
    /// The stage input was rejected.
    InvalidInput,
    /// The dependency rejected the request (4xx other than rate limiting).
    ClientError,
    /// The dependency answered with output that could not be used.
    MalformedOutput,
    /// Anything else, including panics and unclassified errors.
    Internal,
}

impl ErrorKind {
    /// Kinds that are retried unless a policy says otherwise.
    pub const DEFAULT_RETRYABLE: [Self; 4] =
        [Self::Timeout, Self::RateLimited, Self::ServerError, Self::Network];
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Network => "network",
            Self::InvalidInput => "invalid_input",
            Self::ClientError => "client_error",
            Self::MalformedOutput => "malformed_output",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Failure signal returned by a stage.
///
/// A stage reports exactly one of these. Anything else a stage can fail
/// with (an `anyhow::Error`, a panic) is folded into `Fatal`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// Retryable failure: timeout, rate limit, 5xx.
    #[error("transient failure ({kind}): {message}")]
    Transient {
        /// Cause classification.
        kind: ErrorKind,
        /// Human readable detail.
        message: String,
    },

    /// Non-retryable failure: invalid input, 4xx, malformed upstream output.
    #[error("fatal failure ({kind}): {message}")]
    Fatal {
        /// Cause classification.
        kind: ErrorKind,
        /// Human readable detail.
        message: String,
    },

    /// The stage observed cancellation and stopped.
    #[error("cancelled: {reason}")]
    Cancelled {
        /// Why the run was cancelled.
        reason: String,
    },
}

impl StageError {
    /// Creates a transient failure.
    #[must_use]
    pub fn transient(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
        }
    }

    /// Creates a fatal failure.
    #[must_use]
    pub fn fatal(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Fatal {
            kind,
            message: message.into(),
        }
    }

    /// Creates a fatal invalid-input failure.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::fatal(ErrorKind::InvalidInput, message)
    }

    /// Creates a cancellation signal.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Returns the cause classification, if any.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Transient { kind, .. } | Self::Fatal { kind, .. } => Some(*kind),
            Self::Cancelled { .. } => None,
        }
    }

    /// Returns the message without the variant prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } | Self::Fatal { message, .. } => message,
            Self::Cancelled { reason } => reason,
        }
    }

    /// Returns true for `Transient`.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns true for `Cancelled`.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Converts a transient failure into a fatal one with the same cause.
    #[must_use]
    pub fn into_fatal(self) -> Self {
        match self {
            Self::Transient { kind, message } => Self::Fatal { kind, message },
            other => other,
        }
    }
}

impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<Self>() {
            Ok(stage_err) => stage_err,
            Err(err) => Self::fatal(ErrorKind::Internal, format!("{err:#}")),
        }
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        Self::fatal(ErrorKind::MalformedOutput, err.to_string())
    }
}

/// Terminal decision of the retry executor for one protected call.
#[derive(Debug, Clone, Error)]
pub enum ResilienceError {
    /// The breaker for the dependency is open; no call was attempted.
    #[error("circuit open for dependency '{dependency}' (retry in {}ms)", retry_in.as_millis())]
    CircuitOpen {
        /// The dependency name.
        dependency: String,
        /// Remaining cooldown.
        retry_in: Duration,
        /// Attempts made before the breaker refused the call.
        attempts: u32,
    },

    /// Every allowed attempt failed with a retryable error.
    #[error("dependency '{dependency}' still failing after {attempts} attempts: {source}")]
    Exhausted {
        /// The dependency name.
        dependency: String,
        /// Attempts consumed.
        attempts: u32,
        /// The last failure observed.
        source: StageError,
    },

    /// The call failed with an error that must not be retried.
    #[error("non-retryable failure from '{dependency}' on attempt {attempts}: {source}")]
    NonRetryable {
        /// The dependency name.
        dependency: String,
        /// Attempts consumed.
        attempts: u32,
        /// The failure.
        source: StageError,
    },

    /// Cancellation was observed during a call or a backoff sleep.
    #[error("cancelled while calling '{dependency}': {reason}")]
    Cancelled {
        /// The dependency name.
        dependency: String,
        /// Why the run was cancelled.
        reason: String,
    },
}

impl ResilienceError {
    /// Returns the number of attempts consumed.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::CircuitOpen { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::NonRetryable { attempts, .. } => *attempts,
            Self::Cancelled { .. } => 0,
        }
    }

    /// Maps the decision onto the user-facing taxonomy.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::CircuitOpen { .. } => FailureKind::CircuitOpen,
            Self::Exhausted { .. } => FailureKind::Transient,
            Self::NonRetryable { .. } => FailureKind::Fatal,
            Self::Cancelled { .. } => FailureKind::Cancelled,
        }
    }
}

/// Errors raised by checkpoint stores.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The on-disk document was written by a newer schema.
    #[error("checkpoint for run '{run_id}' has schema version {found}, newest supported is {supported}")]
    Incompatible {
        /// The run id.
        run_id: String,
        /// Version found on disk.
        found: u32,
        /// Newest version this build understands.
        supported: u32,
    },

    /// The run id cannot be used as a storage key.
    #[error("invalid run id '{0}'")]
    InvalidRunId(String),

    /// The document could not be encoded or decoded.
    #[error("checkpoint serialization error for run '{run_id}': {source}")]
    Serialization {
        /// The run id.
        run_id: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// IO error.
    #[error("checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    /// Maps onto the user-facing taxonomy.
    ///
    /// Only schema incompatibility has its own kind; every other store
    /// failure is fatal for the run.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Incompatible { .. } => FailureKind::IncompatibleCheckpoint,
            _ => FailureKind::Fatal,
        }
    }
}

/// User-facing failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retryable failure that exhausted its attempts.
    Transient,
    /// Non-retryable failure.
    Fatal,
    /// A call was deliberately skipped by an open breaker.
    CircuitOpen,
    /// The checkpoint on disk is newer than this build.
    IncompatibleCheckpoint,
    /// The run was cancelled.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Fatal => "fatal",
            Self::CircuitOpen => "circuit_open",
            Self::IncompatibleCheckpoint => "incompatible_checkpoint",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl From<&StageError> for FailureKind {
    fn from(err: &StageError) -> Self {
        match err {
            StageError::Transient { .. } => Self::Transient,
            StageError::Fatal { .. } => Self::Fatal,
            StageError::Cancelled { .. } => Self::Cancelled,
        }
    }
}

/// Error raised when a pipeline definition is rejected.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}
