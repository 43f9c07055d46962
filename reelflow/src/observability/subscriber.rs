//! `tracing-subscriber` installation.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Plain,
    /// One JSON object per line.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("plain"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected plain or json)")),
        }
    }
}

/// A global subscriber was already installed.
#[derive(Debug, Error)]
#[error("failed to install tracing subscriber: {0}")]
pub struct TracingInitError(String);

/// Installs the global subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Logs go to stderr so stdout stays free for command output.
pub fn init_tracing(format: LogFormat) -> Result<(), TracingInitError> {
    init_tracing_with(format, DEFAULT_FILTER)
}

/// Installs the global subscriber with a custom fallback filter.
pub fn init_tracing_with(format: LogFormat, default_filter: &str) -> Result<(), TracingInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = match format {
        LogFormat::Plain => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    result.map_err(|e| TracingInitError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("PLAIN".parse::<LogFormat>().unwrap(), LogFormat::Plain);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_tracing_with(LogFormat::Plain, "warn");
        assert!(init_tracing_with(LogFormat::Json, "warn").is_err());
    }
}
