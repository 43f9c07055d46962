//! Stages backed by an external program.
//!
//! The program receives the stage input as JSON on stdin and writes its
//! output as JSON to stdout. Lines on stderr of the form
//! `progress <percent> <message>` are forwarded as progress; the rest is
//! kept for error reporting.

use super::Stage;
use crate::cancellation::{run_cancellable, CancellationToken};
use crate::core::StageValue;
use crate::errors::{ErrorKind, StageError};
use crate::progress::StageProgress;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Exit code signalling a retryable failure (`EX_TEMPFAIL`).
pub const EXIT_TEMPFAIL: i32 = 75;

/// Exit code signalling rejected input (`EX_DATAERR`).
pub const EXIT_INVALID_INPUT: i32 = 65;

const STDERR_TAIL_LINES: usize = 20;

/// Parses a `progress <percent> <message>` line.
#[must_use]
pub fn parse_progress_line(line: &str) -> Option<(f64, String)> {
    let rest = line.trim().strip_prefix("progress")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start();
    let (pct, message) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let pct: f64 = pct.trim_end_matches('%').parse().ok()?;
    Some((pct, message.trim().to_string()))
}

/// A stage that runs an external program.
#[derive(Debug, Clone)]
pub struct CommandStage {
    name: String,
    program: String,
    args: Vec<String>,
    dependency: Option<String>,
    timeout: Option<Duration>,
}

impl CommandStage {
    /// Creates a stage running `program` with `args`.
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            dependency: None,
            timeout: None,
        }
    }

    /// Builds a stage from an argv list; the first element is the program.
    #[must_use]
    pub fn from_argv(name: impl Into<String>, argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(name, program.clone(), args.iter().cloned()))
    }

    /// Declares the external dependency the program calls.
    #[must_use]
    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }

    /// Bounds a single execution; exceeding it is a transient timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn run_child(&self, input: &StageValue, progress: &StageProgress) -> Result<StageValue, StageError> {
        let payload = serde_json::to_vec(input)
            .map_err(|e| StageError::fatal(ErrorKind::Internal, format!("cannot encode input: {e}")))?;

        // Dropping this future drops the child, which kills it.
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                StageError::fatal(ErrorKind::Internal, format!("cannot spawn '{}': {e}", self.program))
            })?;

        let (Some(mut stdin), Some(mut stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(StageError::fatal(ErrorKind::Internal, "child stdio not captured"));
        };

        let write_input = async move {
            // The program may exit without reading; its exit status decides.
            let _ = stdin.write_all(&payload).await;
            let _ = stdin.shutdown().await;
        };

        let read_output = async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.map(|_| buf)
        };

        let progress = progress.clone();
        let read_diagnostics = async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some((pct, message)) = parse_progress_line(&line) {
                    progress.report(pct, message);
                } else {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        };

        let ((), output, diagnostics, status) =
            tokio::join!(write_input, read_output, read_diagnostics, child.wait());

        let status = status
            .map_err(|e| StageError::fatal(ErrorKind::Internal, format!("cannot wait for '{}': {e}", self.program)))?;
        let output = output
            .map_err(|e| StageError::transient(ErrorKind::Network, format!("cannot read stdout: {e}")))?;

        debug!(stage = %self.name, status = ?status.code(), "Command stage exited");

        match status.code() {
            Some(0) => {
                if output.iter().all(u8::is_ascii_whitespace) {
                    return Ok(StageValue::Null);
                }
                serde_json::from_slice(&output).map_err(|e| {
                    StageError::fatal(ErrorKind::MalformedOutput, format!("stdout is not JSON: {e}"))
                })
            }
            Some(EXIT_TEMPFAIL) => Err(StageError::transient(ErrorKind::ServerError, diagnostics)),
            Some(EXIT_INVALID_INPUT) => Err(StageError::invalid_input(diagnostics)),
            Some(code) => Err(StageError::fatal(
                ErrorKind::Internal,
                format!("exited with code {code}: {diagnostics}"),
            )),
            None => Err(StageError::fatal(
                ErrorKind::Internal,
                format!("terminated by signal: {diagnostics}"),
            )),
        }
    }
}

#[async_trait]
impl Stage for CommandStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependency(&self) -> Option<&str> {
        self.dependency.as_deref()
    }

    async fn execute(
        &self,
        input: &StageValue,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> Result<StageValue, StageError> {
        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, self.run_child(input, progress))
                    .await
                    .map_err(|_| {
                        StageError::transient(
                            ErrorKind::Timeout,
                            format!("'{}' exceeded {}s", self.program, limit.as_secs_f64()),
                        )
                    })?,
                None => self.run_child(input, progress).await,
            }
        };
        run_cancellable(cancel, bounded)
            .await
            .map_err(StageError::cancelled)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{CollectingProgressSink, ProgressReporter};
    use serde_json::json;
    use std::sync::Arc;

    fn sh(name: &str, script: &str) -> CommandStage {
        CommandStage::new(name, "sh", ["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_parse_progress_line() {
        assert_eq!(parse_progress_line("progress 40 rendering"), Some((40.0, "rendering".to_string())));
        assert_eq!(parse_progress_line("progress 12.5% halfway there"), Some((12.5, "halfway there".to_string())));
        assert_eq!(parse_progress_line("progress 100"), Some((100.0, String::new())));
        assert_eq!(parse_progress_line("progressive rock"), None);
        assert_eq!(parse_progress_line("progress lots"), None);
        assert_eq!(parse_progress_line("error: boom"), None);
    }

    #[test]
    fn test_from_argv() {
        assert!(CommandStage::from_argv("idea", &[]).is_none());
        let stage = CommandStage::from_argv("idea", &["python3".to_string(), "idea.py".to_string()]).unwrap();
        assert_eq!(stage.program, "python3");
        assert_eq!(stage.args, vec!["idea.py".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_stage_success_with_progress() {
        let sink = Arc::new(CollectingProgressSink::new());
        let progress = ProgressReporter::new(sink.clone()).for_stage("idea", 0, 1);
        let stage = sh("idea", "cat >/dev/null; echo 'progress 50 thinking' >&2; echo '{\"idea\":\"cats\"}'");

        let out = stage
            .execute(&json!("cats"), &progress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out, json!({ "idea": "cats" }));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].message, "thinking");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_stage_echoes_input() {
        let stage = sh("script", "cat");
        let out = stage
            .execute(&json!({ "topic": "owls" }), &StageProgress::detached("script"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, json!({ "topic": "owls" }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_stage_exit_codes() {
        let cancel = CancellationToken::new();
        let progress = StageProgress::detached("voice");

        let err = sh("voice", "echo 'rate limited' >&2; exit 75")
            .execute(&json!(null), &progress, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.message().contains("rate limited"));

        let err = sh("voice", "exit 65").execute(&json!(null), &progress, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidInput));

        let err = sh("voice", "exit 3").execute(&json!(null), &progress, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Internal));

        let err = sh("voice", "echo not-json").execute(&json!(null), &progress, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::MalformedOutput));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_stage_timeout_is_transient() {
        let stage = sh("video", "sleep 5").with_timeout(Duration::from_millis(100));
        let err = stage
            .execute(&json!(null), &StageProgress::detached("video"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Timeout));
        assert!(err.is_transient());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_stage_cancellation() {
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel("user abort");
        });

        let started = std::time::Instant::now();
        let err = sh("video", "sleep 30")
            .execute(&json!(null), &StageProgress::detached("video"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_command_stage_missing_program_is_fatal() {
        let stage = CommandStage::new("idea", "/definitely/not/a/program", Vec::<String>::new());
        let err = stage
            .execute(&json!(null), &StageProgress::detached("idea"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(!err.is_cancelled());
    }
}
