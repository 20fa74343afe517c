//! Trait definitions for the transcoder module.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{TranscodeOutput, TranscodeRequest};
use crate::adapter::{ProgressEvent, StageFailure};
use crate::workspace::Workspace;

/// A transcoder that converts workspace files between formats.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Returns the name of this transcoder implementation.
    fn name(&self) -> &str;

    /// Runs one conversion attempt, writing the output into `workspace`.
    ///
    /// The progress sender will receive updates during conversion.
    /// If the receiver is dropped, conversion continues without progress reporting.
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        workspace: &Workspace,
        progress: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Result<TranscodeOutput, StageFailure>;

    /// Validates that the transcoder is properly configured and ready.
    async fn validate(&self) -> Result<(), StageFailure>;
}
