//! Types for the job module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::error::JobError;
use crate::adapter::{FailureKind, ProgressEvent, Stage, StageFailure};
use crate::media::MediaFormat;

/// Opaque unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Downloading,
    Transcoding,
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Downloading)
                | (Downloading, Transcoding)
                | (Downloading, Finalizing)
                | (Transcoding, Finalizing)
                | (Finalizing, Done)
                | (Downloading | Transcoding | Finalizing, Failed)
                | (Queued | Downloading | Transcoding, Cancelled)
        )
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the job holds a slot in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Downloading | Self::Transcoding | Self::Finalizing)
    }

    /// Whether a cancellation request is still honoured.
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Queued | Self::Downloading | Self::Transcoding)
    }

    /// The pipeline stage running in this state.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Downloading => Some(Stage::Download),
            Self::Transcoding => Some(Stage::Transcode),
            Self::Finalizing => Some(Stage::Finalize),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Transcoding => "transcoding",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated media request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub url: String,
    pub format: MediaFormat,
}

impl JobRequest {
    /// Validates the source URL. Only absolute http(s) URLs with a host pass.
    pub fn new(url: &str, format: MediaFormat) -> Result<Self, JobError> {
        let parsed = url::Url::parse(url.trim())
            .map_err(|e| JobError::invalid_url(url, e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(JobError::invalid_url(
                url,
                format!("unsupported scheme '{}'", parsed.scheme()),
            ));
        }
        if parsed.host_str().map(str::is_empty).unwrap_or(true) {
            return Err(JobError::invalid_url(url, "missing host"));
        }
        Ok(Self {
            url: parsed.to_string(),
            format,
        })
    }

    /// Like [`JobRequest::new`] with the format given by name.
    pub fn parse(url: &str, format: &str) -> Result<Self, JobError> {
        let format = format
            .parse::<MediaFormat>()
            .map_err(|e| JobError::UnsupportedFormat(e.0))?;
        Self::new(url, format)
    }
}

/// The delivered result of a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Stage that failed, `None` when the job failed before any stage ran.
    pub stage: Option<Stage>,
    pub kind: FailureKind,
    /// Human readable cause from the last classification.
    pub message: String,
    /// Truncated raw tool output.
    pub diagnostic: Option<String>,
}

impl JobFailure {
    pub fn from_stage(stage: Option<Stage>, failure: StageFailure) -> Self {
        Self {
            stage,
            kind: failure.kind,
            message: failure.reason,
            diagnostic: failure.diagnostic,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{} failed: {}", stage, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source_url: String,
    pub format: MediaFormat,
    pub state: JobState,
    /// 0..=100, reset on every stage entry.
    pub progress: u8,
    pub progress_message: Option<String>,
    pub download_retries: u32,
    pub transcode_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Workspace directory while the job holds one.
    pub workspace: Option<PathBuf>,
    pub output: Option<JobOutput>,
    pub failure: Option<JobFailure>,
}

impl Job {
    /// Creates a queued job.
    pub fn new(id: JobId, request: JobRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            source_url: request.url,
            format: request.format,
            state: JobState::Queued,
            progress: 0,
            progress_message: None,
            download_retries: 0,
            transcode_retries: 0,
            created_at: now,
            updated_at: now,
            finished_at: None,
            workspace: None,
            output: None,
            failure: None,
        }
    }

    /// Retries recorded for a stage.
    pub fn retries(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Download => self.download_retries,
            Stage::Transcode => self.transcode_retries,
            Stage::Finalize => 0,
        }
    }
}

/// Change notifications published by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobUpdate {
    StateChanged {
        id: JobId,
        from: JobState,
        to: JobState,
        at: DateTime<Utc>,
    },
    Progress {
        id: JobId,
        stage: Stage,
        percent: u8,
        message: Option<String>,
    },
}

impl JobUpdate {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::StateChanged { id, .. } | Self::Progress { id, .. } => id,
        }
    }

    pub(crate) fn progress(id: JobId, percent: u8, event: &ProgressEvent) -> Self {
        Self::Progress {
            id,
            stage: event.stage,
            percent,
            message: event.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobState; 7] = [
        JobState::Queued,
        JobState::Downloading,
        JobState::Transcoding,
        JobState::Finalizing,
        JobState::Done,
        JobState::Failed,
        JobState::Cancelled,
    ];

    #[test]
    fn test_allowed_transitions() {
        use JobState::*;
        let allowed = [
            (Queued, Downloading),
            (Queued, Cancelled),
            (Downloading, Transcoding),
            (Downloading, Finalizing),
            (Downloading, Failed),
            (Downloading, Cancelled),
            (Transcoding, Finalizing),
            (Transcoding, Failed),
            (Transcoding, Cancelled),
            (Finalizing, Done),
            (Finalizing, Failed),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.into_iter().filter(JobState::is_terminal) {
            assert!(ALL.iter().all(|to| !from.can_transition_to(*to)));
        }
    }

    #[test]
    fn test_request_accepts_http_urls() {
        let request = JobRequest::new("https://example.test/v/1", MediaFormat::Mp3).unwrap();
        assert_eq!(request.url, "https://example.test/v/1");

        let request = JobRequest::parse("http://example.test/watch?v=abc", "MP4").unwrap();
        assert_eq!(request.format, MediaFormat::Mp4);
    }

    #[test]
    fn test_request_rejects_bad_urls() {
        assert!(matches!(
            JobRequest::new("not a url", MediaFormat::Mp3),
            Err(JobError::InvalidUrl { .. })
        ));
        assert!(matches!(
            JobRequest::new("file:///etc/passwd", MediaFormat::Mp3),
            Err(JobError::InvalidUrl { .. })
        ));
        assert!(matches!(
            JobRequest::parse("https://example.test/v/1", "gif"),
            Err(JobError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_job_ids_are_unique() {
        assert_ne!(JobId::generate(), JobId::generate());
    }

    #[test]
    fn test_new_job_is_queued() {
        let request = JobRequest::new("https://example.test/v/1", MediaFormat::Mp3).unwrap();
        let job = Job::new(JobId::from("a"), request);
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.progress, 0);
        assert!(job.output.is_none());
    }

    #[test]
    fn test_update_serializes_with_tag() {
        let update = JobUpdate::Progress {
            id: JobId::from("a"),
            stage: Stage::Download,
            percent: 10,
            message: None,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["stage"], "download");
    }
}
