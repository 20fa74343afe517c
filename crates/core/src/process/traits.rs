//! Trait definitions for the process module.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::ProcessError;
use super::types::{OutputLine, ProcessInvocation, ProcessResult};

/// Runs external programs under supervision.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs the invocation to completion.
    ///
    /// Every output line is forwarded to `lines` as soon as it is read. If the
    /// receiver is dropped the process keeps running and output is still
    /// retained in the result. Triggering `cancel` terminates the process and
    /// yields [`ProcessError::Cancelled`].
    async fn run(
        &self,
        invocation: &ProcessInvocation,
        lines: Option<mpsc::Sender<OutputLine>>,
        cancel: CancellationToken,
    ) -> Result<ProcessResult, ProcessError>;
}
