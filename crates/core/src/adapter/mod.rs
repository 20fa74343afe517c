//! Pieces shared by the downloader and transcoder adapters.
//!
//! An adapter turns job parameters into a [`ProcessInvocation`], watches the
//! tool's output for progress and finally classifies the [`ProcessResult`].
//! Adapters only classify. Deciding whether to retry belongs to the job.
//!
//! [`ProcessInvocation`]: crate::process::ProcessInvocation
//! [`ProcessResult`]: crate::process::ProcessResult

mod observe;
mod types;

pub use observe::{run_observed, ProgressReporter};
pub use types::{
    Classification, FailureKind, ProgressEvent, Stage, StageFailure, DIAGNOSTIC_LIMIT_BYTES,
};
