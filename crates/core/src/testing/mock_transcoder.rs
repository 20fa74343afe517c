//! Mock transcoder for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use super::mock_stage::{MockStep, ScriptedStage};
use crate::adapter::{ProgressEvent, Stage, StageFailure};
use crate::transcoder::{TranscodeOutput, TranscodeRequest, Transcoder};
use crate::workspace::Workspace;

/// Mock implementation of the Transcoder trait.
///
/// Writes `request.output_path()` on success. A missing input file is a
/// fatal failure, like with the real tool.
#[derive(Debug)]
pub struct MockTranscoder {
    stage: ScriptedStage,
    calls: Arc<RwLock<Vec<TranscodeRequest>>>,
}

impl Default for MockTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranscoder {
    pub fn new() -> Self {
        Self {
            stage: ScriptedStage::new(Stage::Transcode),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Queue the behavior of the next call. Unscripted calls succeed.
    pub async fn push_step(&self, step: MockStep) {
        self.stage.push_step(step).await;
    }

    pub async fn set_delay(&self, delay: Duration) {
        self.stage.set_delay(delay).await;
    }

    pub async fn calls(&self) -> Vec<TranscodeRequest> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.stage.max_concurrent()
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transcode(
        &self,
        request: &TranscodeRequest,
        workspace: &Workspace,
        progress: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Result<TranscodeOutput, StageFailure> {
        self.calls.write().await.push(request.clone());
        if !request.input_path.exists() {
            return Err(StageFailure::fatal(format!(
                "input file missing: {}",
                request.input_path.display()
            )));
        }

        let (path, size_bytes) = self
            .stage
            .execute(
                workspace,
                &request.output_path(),
                b"mock transcoded media",
                progress,
                cancel,
            )
            .await?;
        Ok(TranscodeOutput { path, size_bytes })
    }

    async fn validate(&self) -> Result<(), StageFailure> {
        Ok(())
    }
}
