//! Drives one job through its pipeline.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::RetryConfig;
use super::error::JobError;
use super::finalize::deliver_output;
use super::handle::JobHandle;
use super::types::{Job, JobFailure, JobOutput, JobState};
use crate::adapter::{ProgressEvent, Stage, StageFailure};
use crate::downloader::{DownloadRequest, Downloader};
use crate::metrics;
use crate::transcoder::{TranscodeRequest, Transcoder};
use crate::workspace::{Workspace, WorkspaceError, WorkspaceManager};

const PROGRESS_CHANNEL_CAPACITY: usize = 64;

type StageResult<T> = Result<T, (Option<Stage>, StageFailure)>;

/// Runs the download, transcode and finalize stages of a job.
///
/// The runner alone decides whether a failed stage is retried, escalated or
/// passed. Adapters only classify.
pub struct JobRunner {
    downloader: Arc<dyn Downloader>,
    transcoder: Arc<dyn Transcoder>,
    workspaces: WorkspaceManager,
    retry: RetryConfig,
}

impl JobRunner {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        transcoder: Arc<dyn Transcoder>,
        workspaces: WorkspaceManager,
        retry: RetryConfig,
    ) -> Self {
        Self {
            downloader,
            transcoder,
            workspaces,
            retry,
        }
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Runs a job that has been granted a slot (state `Downloading`) to a
    /// terminal state and returns that state.
    ///
    /// The workspace is disposed before the terminal transition on every path.
    pub async fn run(&self, handle: &JobHandle) -> JobState {
        let job = handle.snapshot();
        let started = Instant::now();
        let cancel = handle.cancel_token();
        info!(job_id = %job.id, url = %job.source_url, format = %job.format, "Job started");

        let workspace = match self.workspaces.acquire(job.id.as_str()).await {
            Ok(workspace) => workspace,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to acquire workspace");
                let failure = match e {
                    WorkspaceError::ResourceExhausted { reason } => {
                        StageFailure::resource_exhausted(reason)
                    }
                    other => StageFailure::fatal(other.to_string()),
                };
                return self.finish(handle, Err((None, failure)), started);
            }
        };
        handle.set_workspace(Some(workspace.path().to_path_buf()));

        let outcome = self.drive(handle, &job, &workspace, &cancel).await;

        match workspace.dispose().await {
            Ok(_) => metrics::WORKSPACES_DISPOSED.inc(),
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to dispose workspace"),
        }
        handle.set_workspace(None);

        self.finish(handle, outcome, started)
    }

    async fn drive(
        &self,
        handle: &JobHandle,
        job: &Job,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> StageResult<JobOutput> {
        let downloader = &self.downloader;
        let request = DownloadRequest {
            job_id: job.id.to_string(),
            url: job.source_url.clone(),
            format: job.format,
        };
        let downloaded = self
            .run_stage(handle, Stage::Download, cancel, |progress| {
                downloader.download(&request, workspace, progress, cancel.clone())
            })
            .await
            .map_err(|f| (Some(Stage::Download), f))?;

        let final_path: PathBuf = if job.format.matches_path(&downloaded.path) {
            debug!(job_id = %job.id, "Download already in target format, skipping transcode");
            downloaded.path
        } else {
            enter(handle, JobState::Transcoding).map_err(|f| (Some(Stage::Transcode), f))?;
            let transcoder = &self.transcoder;
            let request = TranscodeRequest {
                job_id: job.id.to_string(),
                input_path: downloaded.path,
                format: job.format,
            };
            self.run_stage(handle, Stage::Transcode, cancel, |progress| {
                transcoder.transcode(&request, workspace, progress, cancel.clone())
            })
            .await
            .map_err(|f| (Some(Stage::Transcode), f))?
            .path
        };

        enter(handle, JobState::Finalizing).map_err(|f| (Some(Stage::Finalize), f))?;
        let dest = self.workspaces.output_dir_for(job.id.as_str());
        match deliver_output(&final_path, &dest).await {
            Ok(output) => Ok(output),
            Err(failure) => {
                let _ = tokio::fs::remove_dir_all(&dest).await;
                Err((Some(Stage::Finalize), failure))
            }
        }
    }

    /// Runs `attempt` until it succeeds, fails for good, or retries run out.
    async fn run_stage<T, F, Fut>(
        &self,
        handle: &JobHandle,
        stage: Stage,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T, StageFailure>
    where
        F: FnMut(mpsc::Sender<ProgressEvent>) -> Fut,
        Fut: Future<Output = Result<T, StageFailure>>,
    {
        let job_id = handle.id();
        let mut retries = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(StageFailure::cancelled());
            }

            let (tx, mut rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
            let forward = async {
                while let Some(event) = rx.recv().await {
                    handle.update_progress(&event);
                }
            };
            let attempt_started = Instant::now();
            let (result, ()) = tokio::join!(attempt(tx), forward);

            metrics::STAGE_DURATION
                .with_label_values(&[stage.as_str()])
                .observe(attempt_started.elapsed().as_secs_f64());
            let label = match &result {
                Ok(_) => "success",
                Err(failure) => failure.kind.as_str(),
            };
            metrics::STAGE_ATTEMPTS
                .with_label_values(&[stage.as_str(), label])
                .inc();

            let failure = match result {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            if cancel.is_cancelled() {
                return Err(StageFailure::cancelled());
            }
            if !failure.is_retryable() {
                warn!(job_id = %job_id, stage = %stage, reason = %failure.reason, "Stage failed");
                return Err(failure);
            }
            if retries >= self.retry.max_retries {
                warn!(
                    job_id = %job_id,
                    stage = %stage,
                    retries,
                    reason = %failure.reason,
                    "Stage failed, retries exhausted"
                );
                return Err(failure);
            }

            retries = handle.record_retry(stage);
            let delay = self.retry.delay_for(retries);
            warn!(
                job_id = %job_id,
                stage = %stage,
                retry = retries,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                reason = %failure.reason,
                "Stage failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(StageFailure::cancelled()),
            }
        }
    }

    fn finish(
        &self,
        handle: &JobHandle,
        outcome: StageResult<JobOutput>,
        started: Instant,
    ) -> JobState {
        let job_id = handle.id();
        let result = match outcome {
            Ok(output) => {
                info!(job_id = %job_id, path = %output.path.display(), "Job done");
                handle.complete(output)
            }
            Err((_, failure)) if failure.is_cancelled() => {
                info!(job_id = %job_id, "Job cancelled");
                handle.transition(JobState::Cancelled)
            }
            Err((stage, failure)) => {
                warn!(
                    job_id = %job_id,
                    stage = ?stage,
                    kind = failure.kind.as_str(),
                    reason = %failure.reason,
                    "Job failed"
                );
                handle.fail(JobFailure::from_stage(stage, failure))
            }
        };
        if let Err(e) = result {
            error!(job_id = %job_id, error = %e, "Failed to record job outcome");
        }

        let state = handle.state();
        metrics::JOB_DURATION
            .with_label_values(&[state.as_str()])
            .observe(started.elapsed().as_secs_f64());
        state
    }
}

/// Moves the job into the next stage state. A pending cancellation turns into
/// a cancelled failure.
fn enter(handle: &JobHandle, state: JobState) -> Result<(), StageFailure> {
    handle.transition(state).map(|_| ()).map_err(|e| match e {
        JobError::CancelRequested { .. } => StageFailure::cancelled(),
        other => StageFailure::fatal(other.to_string()),
    })
}
