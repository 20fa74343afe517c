//! Types shared by the stage adapters.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::process::{tail_str, ProcessError, ProcessResult};

/// Bytes of raw tool output kept on a failure.
pub const DIAGNOSTIC_LIMIT_BYTES: usize = 2048;

/// A step of the job pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Transcode,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Transcode => "transcode",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress parsed from a tool's output. Transient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// Percent complete, `None` when the line carried no usable figure.
    pub percent: Option<u8>,
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn percent(stage: Stage, percent: f64) -> Self {
        Self {
            stage,
            percent: Some(percent.clamp(0.0, 100.0) as u8),
            message: None,
        }
    }

    pub fn unknown(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            percent: None,
            message: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Verdict on a finished tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// Transient: network trouble, rate limiting, signal death.
    RetryableFailure { reason: String },
    /// Permanent: bad source, unsupported codec, disk full.
    FatalFailure { reason: String },
}

impl Classification {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::RetryableFailure {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::FatalFailure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Converts a failed classification into a [`StageFailure`] carrying the
    /// tail of the tool output. Returns `None` for `Success`.
    pub fn into_failure(self, result: &ProcessResult) -> Option<StageFailure> {
        let failure = match self {
            Self::Success => return None,
            Self::RetryableFailure { reason } => StageFailure::retryable(reason),
            Self::FatalFailure { reason } => StageFailure::fatal(reason),
        };
        Some(failure.with_output(result))
    }
}

/// Why a stage attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The tool could not be started.
    Launch,
    /// The tool ran past its timeout.
    Timeout,
    Retryable,
    Fatal,
    /// Workspace allocation failed.
    ResourceExhausted,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Launch => "launch",
            Self::Timeout => "timeout",
            Self::Retryable => "retryable",
            Self::Fatal => "fatal",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A failed stage attempt as reported by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: FailureKind,
    /// Human readable cause.
    pub reason: String,
    /// Truncated raw tool output.
    pub diagnostic: Option<String>,
}

impl StageFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            diagnostic: None,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Fatal, reason)
    }

    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Retryable, reason)
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "cancelled")
    }

    pub fn resource_exhausted(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::ResourceExhausted, reason)
    }

    /// Attaches raw diagnostic text, keeping only its tail.
    pub fn with_diagnostic(mut self, text: &str) -> Self {
        let text = text.trim();
        if !text.is_empty() {
            self.diagnostic = Some(tail_str(text, DIAGNOSTIC_LIMIT_BYTES).to_string());
        }
        self
    }

    /// Attaches the stderr tail of a result, or stdout when stderr is empty.
    pub fn with_output(self, result: &ProcessResult) -> Self {
        if result.stderr.trim().is_empty() {
            self.with_diagnostic(&result.stdout)
        } else {
            self.with_diagnostic(&result.stderr)
        }
    }

    /// Whether another attempt of the same stage may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FailureKind::Retryable | FailureKind::Timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }

    /// Maps a supervision error onto a stage failure.
    pub fn from_process_error(err: ProcessError) -> Self {
        let reason = err.to_string();
        match err {
            ProcessError::Launch { .. } => Self::new(FailureKind::Launch, reason),
            ProcessError::Timeout { result, .. } => {
                Self::new(FailureKind::Timeout, reason).with_output(&result)
            }
            ProcessError::Cancelled { .. } => Self::cancelled(),
            ProcessError::Io { .. } => Self::retryable(reason),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.reason)
    }
}

impl From<ProcessError> for StageFailure {
    fn from(err: ProcessError) -> Self {
        Self::from_process_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;

    use crate::process::Termination;

    #[test]
    fn test_progress_percent_is_clamped() {
        assert_eq!(ProgressEvent::percent(Stage::Download, 150.0).percent, Some(100));
        assert_eq!(ProgressEvent::percent(Stage::Download, -3.0).percent, Some(0));
        assert_eq!(ProgressEvent::percent(Stage::Download, 42.7).percent, Some(42));
    }

    #[test]
    fn test_success_has_no_failure() {
        let result = ProcessResult::exited(0, "", "");
        assert!(Classification::Success.into_failure(&result).is_none());
    }

    #[test]
    fn test_failure_keeps_stderr_tail() {
        let stderr = format!("{}ERROR: video unavailable", "x".repeat(5000));
        let result = ProcessResult::exited(1, "", stderr);
        let failure = Classification::fatal("video unavailable")
            .into_failure(&result)
            .unwrap();

        assert_eq!(failure.kind, FailureKind::Fatal);
        let diagnostic = failure.diagnostic.unwrap();
        assert!(diagnostic.len() <= DIAGNOSTIC_LIMIT_BYTES);
        assert!(diagnostic.ends_with("ERROR: video unavailable"));
    }

    #[test]
    fn test_falls_back_to_stdout_diagnostic() {
        let result = ProcessResult::exited(1, "something on stdout", "  ");
        let failure = Classification::retryable("odd").into_failure(&result).unwrap();
        assert_eq!(failure.diagnostic.as_deref(), Some("something on stdout"));
    }

    #[test]
    fn test_process_error_mapping() {
        let launch = StageFailure::from(ProcessError::launch(
            "yt-dlp",
            io::Error::new(io::ErrorKind::NotFound, "not found"),
        ));
        assert_eq!(launch.kind, FailureKind::Launch);
        assert!(!launch.is_retryable());

        let mut partial = ProcessResult::exited(0, "", "stalled");
        partial.exit_code = None;
        partial.termination = Termination::TimedOut;
        partial.duration = Duration::from_secs(5);
        let timeout = StageFailure::from(ProcessError::Timeout {
            program: "ffmpeg".into(),
            timeout_secs: 5,
            result: Box::new(partial.clone()),
        });
        assert_eq!(timeout.kind, FailureKind::Timeout);
        assert!(timeout.is_retryable());
        assert_eq!(timeout.diagnostic.as_deref(), Some("stalled"));

        partial.termination = Termination::Cancelled;
        let cancelled = StageFailure::from(ProcessError::Cancelled {
            program: "ffmpeg".into(),
            result: Box::new(partial),
        });
        assert!(cancelled.is_cancelled());
    }
}
