//! Error types for the process module.

use std::path::PathBuf;
use thiserror::Error;

use super::types::ProcessResult;

/// Errors that can occur while supervising an external program.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be started (missing binary, permission denied).
    #[error("failed to launch {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The timeout elapsed; the process was terminated.
    #[error("{} timed out after {timeout_secs} seconds", program.display())]
    Timeout {
        program: PathBuf,
        timeout_secs: u64,
        result: Box<ProcessResult>,
    },

    /// Cancellation was requested; the process was terminated.
    #[error("{} was cancelled", program.display())]
    Cancelled {
        program: PathBuf,
        result: Box<ProcessResult>,
    },

    /// Waiting on the child failed.
    #[error("I/O error while supervising {}: {source}", program.display())]
    Io {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    /// Creates a launch error.
    pub fn launch(program: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Launch {
            program: program.into(),
            source,
        }
    }

    /// Whether the failure is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io { .. })
    }

    /// The partial result captured before the process was terminated.
    pub fn result(&self) -> Option<&ProcessResult> {
        match self {
            Self::Timeout { result, .. } | Self::Cancelled { result, .. } => Some(result),
            Self::Launch { .. } | Self::Io { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_launch_error_display() {
        let err = ProcessError::launch(
            "/usr/bin/yt-dlp",
            io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        );
        assert_eq!(
            err.to_string(),
            "failed to launch /usr/bin/yt-dlp: No such file or directory"
        );
        assert!(!err.is_retryable());
        assert!(err.result().is_none());
    }

    #[test]
    fn test_timeout_keeps_result() {
        let err = ProcessError::Timeout {
            program: PathBuf::from("ffmpeg"),
            timeout_secs: 30,
            result: Box::new(ProcessResult::exited(0, "partial", "")),
        };
        assert_eq!(err.to_string(), "ffmpeg timed out after 30 seconds");
        assert!(err.is_retryable());
        assert_eq!(err.result().map(|r| r.stdout.as_str()), Some("partial"));
    }
}
