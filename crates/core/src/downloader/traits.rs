//! Trait definitions for the downloader module.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{DownloadOutput, DownloadRequest};
use crate::adapter::{ProgressEvent, StageFailure};
use crate::workspace::Workspace;

/// Fetches remote media into a workspace.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Returns the name of this downloader implementation.
    fn name(&self) -> &str;

    /// Runs one download attempt.
    ///
    /// Progress is sent on `progress` without blocking; a dropped receiver is
    /// ignored. Triggering `cancel` terminates the tool and yields a failure
    /// of kind `Cancelled`.
    async fn download(
        &self,
        request: &DownloadRequest,
        workspace: &Workspace,
        progress: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Result<DownloadOutput, StageFailure>;

    /// Checks that the wrapped tool can be launched.
    async fn validate(&self) -> Result<(), StageFailure>;
}
