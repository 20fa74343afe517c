//! Scripted process runner for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::process::{
    OutputLine, ProcessError, ProcessInvocation, ProcessResult, ProcessRunner, Termination,
};

enum ScriptedRun {
    Finish {
        lines: Vec<OutputLine>,
        result: Result<ProcessResult, ProcessError>,
    },
    Hang,
}

/// Mock implementation of the ProcessRunner trait.
///
/// Each call to `run` consumes the next scripted outcome in order. With the
/// script exhausted every run exits 0 with no output.
///
/// # Example
///
/// ```rust,ignore
/// use mediafetch_core::testing::ScriptedProcessRunner;
///
/// let runner = ScriptedProcessRunner::new();
/// runner.push_result(vec![], Ok(ProcessResult::exited(0, "", ""))).await;
///
/// // The first run "writes" a file, like a real tool would.
/// runner.create_file_on_run(0, "/tmp/ws/raw.mp4", b"bytes".to_vec()).await;
///
/// let invocations = runner.invocations().await;
/// ```
#[derive(Default)]
pub struct ScriptedProcessRunner {
    script: Arc<RwLock<VecDeque<ScriptedRun>>>,
    /// Files to create, keyed by the 0-based index of the run.
    files: Arc<RwLock<HashMap<usize, Vec<(PathBuf, Vec<u8>)>>>>,
    invocations: Arc<RwLock<Vec<ProcessInvocation>>>,
}

impl std::fmt::Debug for ScriptedProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProcessRunner").finish_non_exhaustive()
    }
}

impl ScriptedProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the outcome of the next run. `lines` are streamed before it returns.
    pub async fn push_result(
        &self,
        lines: Vec<OutputLine>,
        result: Result<ProcessResult, ProcessError>,
    ) {
        self.script
            .write()
            .await
            .push_back(ScriptedRun::Finish { lines, result });
    }

    /// Queues a run that only ends on cancellation or timeout.
    pub async fn push_hang(&self) {
        self.script.write().await.push_back(ScriptedRun::Hang);
    }

    /// Writes `contents` to `path` when run number `index` finishes.
    pub async fn create_file_on_run(
        &self,
        index: usize,
        path: impl Into<PathBuf>,
        contents: Vec<u8>,
    ) {
        self.files
            .write()
            .await
            .entry(index)
            .or_default()
            .push((path.into(), contents));
    }

    /// Every invocation seen so far, in order.
    pub async fn invocations(&self) -> Vec<ProcessInvocation> {
        self.invocations.read().await.clone()
    }

    fn terminated(termination: Termination) -> Box<ProcessResult> {
        Box::new(ProcessResult {
            exit_code: None,
            termination,
            ..ProcessResult::exited(0, "", "")
        })
    }

    async fn write_files(&self, index: usize) {
        let files = self.files.write().await.remove(&index).unwrap_or_default();
        for (path, contents) in files {
            if let Some(parent) = path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            let _ = tokio::fs::write(&path, contents).await;
        }
    }
}

#[async_trait]
impl ProcessRunner for ScriptedProcessRunner {
    async fn run(
        &self,
        invocation: &ProcessInvocation,
        lines: Option<mpsc::Sender<OutputLine>>,
        cancel: CancellationToken,
    ) -> Result<ProcessResult, ProcessError> {
        let index = {
            let mut invocations = self.invocations.write().await;
            invocations.push(invocation.clone());
            invocations.len() - 1
        };
        let next = self.script.write().await.pop_front();
        let program = invocation.program().to_path_buf();

        match next {
            Some(ScriptedRun::Hang) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ProcessError::Cancelled {
                        result: Self::terminated(Termination::Cancelled),
                        program,
                    }),
                    _ = tokio::time::sleep(invocation.timeout()) => Err(ProcessError::Timeout {
                        timeout_secs: invocation.timeout().as_secs(),
                        result: Self::terminated(Termination::TimedOut),
                        program,
                    }),
                }
            }
            Some(ScriptedRun::Finish {
                lines: scripted,
                result,
            }) => {
                if let Some(tx) = lines {
                    for line in scripted {
                        let _ = tx.send(line).await;
                    }
                }
                if cancel.is_cancelled() {
                    return Err(ProcessError::Cancelled {
                        result: Self::terminated(Termination::Cancelled),
                        program,
                    });
                }
                self.write_files(index).await;
                result
            }
            None => {
                self.write_files(index).await;
                Ok(ProcessResult::exited(0, "", ""))
            }
        }
    }
}
