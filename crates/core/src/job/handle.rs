//! Shared, lock-protected job record.

use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::JobError;
use super::types::{Job, JobFailure, JobId, JobOutput, JobState, JobUpdate};
use crate::adapter::{ProgressEvent, Stage};

/// Result of asking a job to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRequest {
    /// The job was queued and is now `Cancelled`.
    Cancelled,
    /// The running job was signalled and will reach `Cancelled` after teardown.
    Signalled,
    /// The job is finalizing and will complete.
    TooLate,
    /// The job had already finished.
    AlreadyFinished,
}

struct JobCell {
    job: Mutex<Job>,
    cancel: CancellationToken,
    updates: broadcast::Sender<JobUpdate>,
}

/// Handle to a job shared by the scheduler and the job's own task.
///
/// All mutation goes through here so every change is published on the
/// update channel and checked against the state machine.
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobCell>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let job = self.inner.job.lock();
        f.debug_struct("JobHandle")
            .field("id", &job.id)
            .field("state", &job.state)
            .finish()
    }
}

impl JobHandle {
    pub fn new(job: Job, updates: broadcast::Sender<JobUpdate>) -> Self {
        Self {
            inner: Arc::new(JobCell {
                job: Mutex::new(job),
                cancel: CancellationToken::new(),
                updates,
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.job.lock().id.clone()
    }

    /// Consistent copy of the job record.
    pub fn snapshot(&self) -> Job {
        self.inner.job.lock().clone()
    }

    pub fn state(&self) -> JobState {
        self.inner.job.lock().state
    }

    /// Token observed by the job's pipeline and the process it runs.
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Moves the job to `to`.
    ///
    /// Once cancellation has been requested the only forward move allowed
    /// out of a running state is to `Cancelled` or `Failed`.
    pub fn transition(&self, to: JobState) -> Result<JobState, JobError> {
        let mut job = self.inner.job.lock();
        self.transition_locked(&mut job, to)
    }

    /// Records the failure and moves the job to `Failed`.
    pub fn fail(&self, failure: JobFailure) -> Result<JobState, JobError> {
        let mut job = self.inner.job.lock();
        if !job.state.can_transition_to(JobState::Failed) {
            return Err(JobError::InvalidTransition {
                from: job.state,
                to: JobState::Failed,
            });
        }
        job.failure = Some(failure);
        self.transition_locked(&mut job, JobState::Failed)
    }

    /// Records the delivered output and moves the job to `Done`.
    pub fn complete(&self, output: JobOutput) -> Result<JobState, JobError> {
        let mut job = self.inner.job.lock();
        if !job.state.can_transition_to(JobState::Done) {
            return Err(JobError::InvalidTransition {
                from: job.state,
                to: JobState::Done,
            });
        }
        job.output = Some(output);
        self.transition_locked(&mut job, JobState::Done)
    }

    /// Signals a running job to stop.
    ///
    /// A queued job is only flagged here. The scheduler cancels queued jobs
    /// through [`JobHandle::cancel_queued`] under its own lock so they can
    /// never be dispatched afterwards.
    pub fn request_cancel(&self) -> CancelRequest {
        let job = self.inner.job.lock();
        match job.state {
            JobState::Queued | JobState::Downloading | JobState::Transcoding => {
                self.inner.cancel.cancel();
                CancelRequest::Signalled
            }
            JobState::Finalizing => CancelRequest::TooLate,
            JobState::Done | JobState::Failed | JobState::Cancelled => {
                CancelRequest::AlreadyFinished
            }
        }
    }

    /// Cancels a queued job on the spot.
    pub(crate) fn cancel_queued(&self) -> Result<JobState, JobError> {
        let mut job = self.inner.job.lock();
        if job.state != JobState::Queued {
            return Err(JobError::InvalidTransition {
                from: job.state,
                to: JobState::Cancelled,
            });
        }
        self.inner.cancel.cancel();
        self.transition_locked(&mut job, JobState::Cancelled)
    }

    /// Applies a progress event. Percentages never go down within a stage
    /// and events from a stage the job has left are ignored.
    pub fn update_progress(&self, event: &ProgressEvent) {
        let mut job = self.inner.job.lock();
        if job.state.stage() != Some(event.stage) {
            return;
        }

        let mut changed = false;
        if let Some(percent) = event.percent {
            let percent = percent.min(100);
            if percent > job.progress {
                job.progress = percent;
                changed = true;
            }
        }
        if event.message.is_some() && event.message != job.progress_message {
            job.progress_message = event.message.clone();
            changed = true;
        }
        if changed {
            job.updated_at = Utc::now();
            let _ = self
                .inner
                .updates
                .send(JobUpdate::progress(job.id.clone(), job.progress, event));
        }
    }

    /// Counts a retry of `stage`.
    pub fn record_retry(&self, stage: Stage) -> u32 {
        let mut job = self.inner.job.lock();
        job.updated_at = Utc::now();
        match stage {
            Stage::Download => {
                job.download_retries += 1;
                job.download_retries
            }
            Stage::Transcode => {
                job.transcode_retries += 1;
                job.transcode_retries
            }
            Stage::Finalize => 0,
        }
    }

    pub fn set_workspace(&self, path: Option<PathBuf>) {
        let mut job = self.inner.job.lock();
        job.workspace = path;
        job.updated_at = Utc::now();
    }

    fn transition_locked(&self, job: &mut Job, to: JobState) -> Result<JobState, JobError> {
        let from = job.state;
        if !from.can_transition_to(to) {
            return Err(JobError::InvalidTransition { from, to });
        }
        if self.inner.cancel.is_cancelled()
            && matches!(to, JobState::Transcoding | JobState::Finalizing)
        {
            return Err(JobError::CancelRequested { to });
        }

        let now = Utc::now();
        job.state = to;
        job.updated_at = now;
        if to.stage().is_some() {
            job.progress = 0;
            job.progress_message = None;
        }
        if to.is_terminal() {
            job.finished_at = Some(now);
        }
        if to == JobState::Done {
            job.progress = 100;
        }

        debug!(job_id = %job.id, from = %from, to = %to, "Job state changed");
        let _ = self.inner.updates.send(JobUpdate::StateChanged {
            id: job.id.clone(),
            from,
            to,
            at: now,
        });
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::FailureKind;
    use crate::job::JobRequest;
    use crate::media::MediaFormat;

    fn handle() -> (JobHandle, broadcast::Receiver<JobUpdate>) {
        let (tx, rx) = broadcast::channel(64);
        let request = JobRequest::new("https://example.test/v/1", MediaFormat::Mp3).unwrap();
        (JobHandle::new(Job::new(JobId::from("job-1"), request), tx), rx)
    }

    #[test]
    fn test_transition_publishes_update() {
        let (handle, mut rx) = handle();
        assert_eq!(handle.transition(JobState::Downloading).unwrap(), JobState::Queued);

        match rx.try_recv().unwrap() {
            JobUpdate::StateChanged { from, to, .. } => {
                assert_eq!(from, JobState::Queued);
                assert_eq!(to, JobState::Downloading);
            }
            other => panic!("unexpected update {:?}", other),
        }
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let (handle, _rx) = handle();
        let err = handle.transition(JobState::Done).unwrap_err();
        assert_eq!(
            err,
            JobError::InvalidTransition {
                from: JobState::Queued,
                to: JobState::Done
            }
        );
        assert_eq!(handle.state(), JobState::Queued);
    }

    #[test]
    fn test_progress_is_monotonic_and_reset_per_stage() {
        let (handle, _rx) = handle();
        handle.transition(JobState::Downloading).unwrap();

        handle.update_progress(&ProgressEvent::percent(Stage::Download, 40.0));
        handle.update_progress(&ProgressEvent::percent(Stage::Download, 20.0));
        assert_eq!(handle.snapshot().progress, 40);

        handle.update_progress(&ProgressEvent::unknown(Stage::Download, "merging"));
        let job = handle.snapshot();
        assert_eq!(job.progress, 40);
        assert_eq!(job.progress_message.as_deref(), Some("merging"));

        handle.transition(JobState::Transcoding).unwrap();
        assert_eq!(handle.snapshot().progress, 0);

        // Late events from the previous stage are ignored.
        handle.update_progress(&ProgressEvent::percent(Stage::Download, 90.0));
        assert_eq!(handle.snapshot().progress, 0);
    }

    #[test]
    fn test_cancel_blocks_forward_transitions() {
        let (handle, _rx) = handle();
        handle.transition(JobState::Downloading).unwrap();

        assert_eq!(handle.request_cancel(), CancelRequest::Signalled);
        assert!(handle.cancel_token().is_cancelled());
        assert_eq!(
            handle.transition(JobState::Finalizing).unwrap_err(),
            JobError::CancelRequested {
                to: JobState::Finalizing
            }
        );
        handle.transition(JobState::Cancelled).unwrap();
        assert_eq!(handle.request_cancel(), CancelRequest::AlreadyFinished);
    }

    #[test]
    fn test_cancel_while_finalizing_is_too_late() {
        let (handle, _rx) = handle();
        handle.transition(JobState::Downloading).unwrap();
        handle.transition(JobState::Finalizing).unwrap();

        assert_eq!(handle.request_cancel(), CancelRequest::TooLate);
        assert!(!handle.is_cancel_requested());
    }

    #[test]
    fn test_cancel_queued() {
        let (handle, _rx) = handle();
        handle.cancel_queued().unwrap();
        let job = handle.snapshot();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_fail_records_cause() {
        let (handle, _rx) = handle();
        handle.transition(JobState::Downloading).unwrap();
        handle
            .fail(JobFailure {
                stage: Some(Stage::Download),
                kind: FailureKind::Fatal,
                message: "video unavailable".into(),
                diagnostic: None,
            })
            .unwrap();

        let job = handle.snapshot();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure.unwrap().message, "video unavailable");
    }

    #[test]
    fn test_complete_sets_output() {
        let (handle, _rx) = handle();
        handle.transition(JobState::Downloading).unwrap();
        handle.transition(JobState::Finalizing).unwrap();
        handle
            .complete(JobOutput {
                path: PathBuf::from("/out/job-1/raw.mp3"),
                size_bytes: 3,
            })
            .unwrap();

        let job = handle.snapshot();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.progress, 100);
        assert!(job.output.is_some());
    }

    #[test]
    fn test_record_retry() {
        let (handle, _rx) = handle();
        assert_eq!(handle.record_retry(Stage::Download), 1);
        assert_eq!(handle.record_retry(Stage::Download), 2);
        assert_eq!(handle.record_retry(Stage::Transcode), 1);
        assert_eq!(handle.snapshot().download_retries, 2);
    }
}
