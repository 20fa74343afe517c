//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the process runner and both
//! stage adapters, so the pipeline and scheduler can be exercised without
//! yt-dlp or ffmpeg installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use mediafetch_core::testing::{MockDownloader, MockStep, MockTranscoder};
//!
//! let downloader = Arc::new(MockDownloader::new());
//! let transcoder = Arc::new(MockTranscoder::new());
//!
//! // Keep jobs busy long enough to observe them.
//! downloader.set_delay(Duration::from_millis(200)).await;
//! transcoder.push_step(MockStep::Fail(StageFailure::fatal("unsupported codec"))).await;
//!
//! let runner = JobRunner::new(downloader.clone(), transcoder.clone(), workspaces, retry);
//! let scheduler = JobScheduler::new(config, runner);
//! ```

mod mock_downloader;
mod mock_stage;
mod mock_transcoder;
mod scripted_runner;

pub use mock_downloader::MockDownloader;
pub use mock_stage::MockStep;
pub use mock_transcoder::MockTranscoder;
pub use scripted_runner::ScriptedProcessRunner;
