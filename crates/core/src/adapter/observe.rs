//! Running a tool while watching its output.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{ProgressEvent, Stage};
use crate::process::{OutputLine, ProcessError, ProcessInvocation, ProcessResult, ProcessRunner};

const LINE_CHANNEL_CAPACITY: usize = 256;

/// Runs `invocation` and feeds every output line to `on_line` while the
/// process is still running.
///
/// Lines still buffered when the process exits are delivered before this
/// returns.
pub async fn run_observed<F>(
    runner: &dyn ProcessRunner,
    invocation: &ProcessInvocation,
    cancel: CancellationToken,
    mut on_line: F,
) -> Result<ProcessResult, ProcessError>
where
    F: FnMut(&OutputLine) + Send,
{
    let (tx, mut rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    let run = runner.run(invocation, Some(tx), cancel);
    tokio::pin!(run);

    let mut lines_open = true;
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            line = rx.recv(), if lines_open => match line {
                Some(line) => on_line(&line),
                None => lines_open = false,
            },
        }
    };

    while let Ok(line) = rx.try_recv() {
        on_line(&line);
    }
    result
}

/// Forwards progress without ever blocking the tool's output pump.
///
/// Repeated percentages are dropped and a full channel loses the event.
#[derive(Debug)]
pub struct ProgressReporter {
    stage: Stage,
    tx: mpsc::Sender<ProgressEvent>,
    last_percent: Option<u8>,
}

impl ProgressReporter {
    pub fn new(stage: Stage, tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self {
            stage,
            tx,
            last_percent: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn report(&mut self, event: ProgressEvent) {
        if event.percent.is_some() && event.percent == self.last_percent {
            return;
        }
        if event.percent.is_some() {
            self.last_percent = event.percent;
        }
        let _ = self.tx.try_send(event);
    }

    pub fn percent(&mut self, percent: f64) {
        self.report(ProgressEvent::percent(self.stage, percent));
    }
}
