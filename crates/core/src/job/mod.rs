//! Jobs and their state machine.
//!
//! A job is one media request bound to one workspace. [`JobRunner`] drives a
//! job through download, transcode and finalize, retrying transient stage
//! failures with backoff, and always disposes the workspace before the job
//! reaches a terminal state.
//!
//! ```text
//! Queued -> Downloading -> [Transcoding ->] Finalizing -> Done
//! Downloading | Transcoding | Finalizing -> Failed
//! Queued | Downloading | Transcoding -> Cancelled
//! ```

mod config;
mod error;
mod finalize;
mod handle;
mod runner;
mod types;

pub use config::RetryConfig;
pub use error::JobError;
pub use finalize::deliver_output;
pub use handle::{CancelRequest, JobHandle};
pub use runner::JobRunner;
pub use types::{Job, JobFailure, JobId, JobOutput, JobRequest, JobState, JobUpdate};
