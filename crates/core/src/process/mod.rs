//! Supervised execution of external programs.
//!
//! This module knows nothing about downloading or transcoding. It launches a
//! program described by a [`ProcessInvocation`], streams its output line by
//! line to an optional observer, enforces the invocation timeout, and makes
//! sure the child (and anything it spawned in its process group) is gone
//! before returning.
//!
//! # Example
//!
//! ```ignore
//! use mediafetch_core::process::{ProcessInvocation, ProcessRunner, TokioProcessRunner};
//!
//! let runner = TokioProcessRunner::with_defaults();
//! let invocation = ProcessInvocation::new("ffmpeg", "/tmp", Duration::from_secs(10))
//!     .arg("-version");
//!
//! let result = runner.run(&invocation, None, CancellationToken::new()).await?;
//! println!("exit code: {:?}", result.exit_code);
//! ```

mod codec;
mod config;
mod error;
mod runner;
mod traits;
mod types;

pub use codec::OutputLineCodec;
pub use config::ProcessConfig;
pub use error::ProcessError;
pub use runner::TokioProcessRunner;
pub use traits::ProcessRunner;
pub use types::{
    tail_str, OutputBuffer, OutputLine, OutputStream, ProcessInvocation, ProcessResult,
    Termination,
};
