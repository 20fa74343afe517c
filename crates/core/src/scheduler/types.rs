//! Types for the job scheduler.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{JobError, JobFailure, JobId, JobState};
use crate::workspace::WorkspaceError;

/// Errors returned by the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Every slot is busy and the queue is full.
    #[error("capacity exceeded: {running} running, {queued} queued")]
    CapacityExceeded { running: usize, queued: usize },

    /// No job with this id (never existed or already purged).
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The job has not finished yet.
    #[error("job {id} is still {state}")]
    Pending { id: JobId, state: JobState },

    /// The job failed.
    #[error("job {id} failed: {failure}")]
    Failed { id: JobId, failure: JobFailure },

    /// The job was cancelled.
    #[error("job {0} was cancelled")]
    Cancelled(JobId),

    /// The request was rejected before admission.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] JobError),

    /// The scheduler is not started or is shutting down.
    #[error("scheduler is not accepting jobs")]
    NotRunning,

    /// The operation is not allowed in the job's current state.
    #[error("job {id} is {state}")]
    InvalidState { id: JobId, state: JobState },

    /// Preparing the workspace base failed.
    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),
}

impl SchedulerError {
    /// Label used for the rejection metric.
    pub(crate) fn rejection_reason(&self) -> &'static str {
        match self {
            Self::CapacityExceeded { .. } => "capacity",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotRunning => "not_running",
            _ => "other",
        }
    }
}

/// Current scheduler occupancy and totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Whether new submissions are admitted.
    pub accepting: bool,
    /// Jobs holding a slot.
    pub running: usize,
    /// Jobs waiting for a slot.
    pub queued: usize,
    /// Slot count.
    pub capacity: usize,
    pub queue_capacity: usize,
    /// Jobs currently retained, any state.
    pub retained: usize,
    pub done: u64,
    pub failed: u64,
    pub cancelled: u64,
}
