//! Error types for the job module.

use thiserror::Error;

use super::types::JobState;

/// Errors raised by job bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The state machine does not allow this move.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: JobState, to: JobState },

    /// Cancellation was requested; the job may only move to `Cancelled`.
    #[error("job cancellation requested, refusing transition to {to}")]
    CancelRequested { to: JobState },

    /// The source is not an absolute http(s) URL.
    #[error("invalid source URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The requested output format is unknown.
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),
}

impl JobError {
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
