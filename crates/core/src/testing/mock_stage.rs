//! Scripted behavior shared by the downloader and transcoder mocks.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::adapter::{ProgressEvent, Stage, StageFailure};
use crate::workspace::Workspace;

/// What a mock does on one call.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Write the output file and succeed.
    Succeed,
    /// Fail with the given classification.
    Fail(StageFailure),
    /// Block until cancelled, then report a cancelled failure.
    WaitForCancel,
}

#[derive(Debug)]
pub(crate) struct ScriptedStage {
    stage: Stage,
    steps: Arc<RwLock<VecDeque<MockStep>>>,
    workspaces: Arc<RwLock<Vec<PathBuf>>>,
    delay_ms: Arc<RwLock<u64>>,
    progress: Arc<RwLock<Vec<u8>>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl ScriptedStage {
    pub(crate) fn new(stage: Stage) -> Self {
        Self {
            stage,
            steps: Arc::new(RwLock::new(VecDeque::new())),
            workspaces: Arc::new(RwLock::new(Vec::new())),
            delay_ms: Arc::new(RwLock::new(0)),
            progress: Arc::new(RwLock::new(vec![50, 100])),
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) async fn push_step(&self, step: MockStep) {
        self.steps.write().await.push_back(step);
    }

    pub(crate) async fn set_delay(&self, delay: Duration) {
        *self.delay_ms.write().await = delay.as_millis() as u64;
    }

    pub(crate) async fn set_progress(&self, percents: Vec<u8>) {
        *self.progress.write().await = percents;
    }

    pub(crate) async fn workspaces(&self) -> Vec<PathBuf> {
        self.workspaces.read().await.clone()
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Runs one scripted call, writing `output` with `contents` on success.
    pub(crate) async fn execute(
        &self,
        workspace: &Workspace,
        output: &Path,
        contents: &[u8],
        progress: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Result<(PathBuf, u64), StageFailure> {
        self.workspaces
            .write()
            .await
            .push(workspace.path().to_path_buf());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let result = self
            .execute_inner(workspace, output, contents, progress, cancel)
            .await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn execute_inner(
        &self,
        workspace: &Workspace,
        output: &Path,
        contents: &[u8],
        progress: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Result<(PathBuf, u64), StageFailure> {
        let step = self
            .steps
            .write()
            .await
            .pop_front()
            .unwrap_or(MockStep::Succeed);

        let delay = Duration::from_millis(*self.delay_ms.read().await);
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(StageFailure::cancelled()),
            }
        }

        match step {
            MockStep::Fail(failure) => Err(failure),
            MockStep::WaitForCancel => {
                cancel.cancelled().await;
                Err(StageFailure::cancelled())
            }
            MockStep::Succeed => {
                if cancel.is_cancelled() {
                    return Err(StageFailure::cancelled());
                }
                let percents = self.progress.read().await.clone();
                for percent in percents {
                    let _ = progress.try_send(ProgressEvent::percent(self.stage, percent as f64));
                }

                workspace
                    .track(output)
                    .map_err(|e| StageFailure::fatal(e.to_string()))?;
                tokio::fs::write(output, contents)
                    .await
                    .map_err(|e| StageFailure::fatal(e.to_string()))?;
                Ok((output.to_path_buf(), contents.len() as u64))
            }
        }
    }
}
