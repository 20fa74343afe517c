//! Mock downloader for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use super::mock_stage::{MockStep, ScriptedStage};
use crate::adapter::{ProgressEvent, Stage, StageFailure};
use crate::downloader::{DownloadOutput, DownloadRequest, Downloader};
use crate::workspace::Workspace;

/// Mock implementation of the Downloader trait.
///
/// Provides controllable behavior for testing:
/// - Script success, failure or a cancel-only wait per call
/// - Delay every call to keep jobs running
/// - Record requests and workspaces for assertions
/// - Track the peak number of concurrent calls
///
/// # Example
///
/// ```rust,ignore
/// use mediafetch_core::testing::{MockDownloader, MockStep};
///
/// let downloader = MockDownloader::new();
/// downloader.push_step(MockStep::Fail(StageFailure::retryable("HTTP Error 503"))).await;
///
/// // Second call succeeds and writes raw.mp4 into the workspace.
/// ```
#[derive(Debug)]
pub struct MockDownloader {
    stage: ScriptedStage,
    calls: Arc<RwLock<Vec<DownloadRequest>>>,
    output_name: Arc<RwLock<String>>,
}

impl Default for MockDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDownloader {
    /// Create a mock that downloads `raw.mp4` on every call.
    pub fn new() -> Self {
        Self {
            stage: ScriptedStage::new(Stage::Download),
            calls: Arc::new(RwLock::new(Vec::new())),
            output_name: Arc::new(RwLock::new("raw.mp4".to_string())),
        }
    }

    /// Queue the behavior of the next call. Unscripted calls succeed.
    pub async fn push_step(&self, step: MockStep) {
        self.stage.push_step(step).await;
    }

    /// Delay every call by `delay` (cancellable).
    pub async fn set_delay(&self, delay: Duration) {
        self.stage.set_delay(delay).await;
    }

    /// Set the file name the download produces.
    pub async fn set_output_name(&self, name: impl Into<String>) {
        *self.output_name.write().await = name.into();
    }

    /// Set the percentages reported on success.
    pub async fn set_progress(&self, percents: Vec<u8>) {
        self.stage.set_progress(percents).await;
    }

    /// Get all recorded requests.
    pub async fn calls(&self) -> Vec<DownloadRequest> {
        self.calls.read().await.clone()
    }

    /// Get the number of download calls.
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Workspace directory of every call, in order.
    pub async fn workspaces(&self) -> Vec<std::path::PathBuf> {
        self.stage.workspaces().await
    }

    /// Highest number of calls seen running at once.
    pub fn max_concurrent(&self) -> usize {
        self.stage.max_concurrent()
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    fn name(&self) -> &str {
        "mock"
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        workspace: &Workspace,
        progress: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Result<DownloadOutput, StageFailure> {
        self.calls.write().await.push(request.clone());
        let output = workspace.path().join(self.output_name.read().await.as_str());

        let (path, size_bytes) = self
            .stage
            .execute(workspace, &output, b"mock media", progress, cancel)
            .await?;
        Ok(DownloadOutput { path, size_bytes })
    }

    async fn validate(&self) -> Result<(), StageFailure> {
        Ok(())
    }
}
