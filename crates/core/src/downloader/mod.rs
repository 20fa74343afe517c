//! Downloader adapter.
//!
//! Fetches the media behind a source URL into a job workspace using `yt-dlp`.
//! The adapter builds the invocation, turns `[download]` lines into progress
//! events and classifies the exit into success, retryable or fatal.

mod config;
mod traits;
mod types;
mod ytdlp;

pub use config::DownloaderConfig;
pub use traits::Downloader;
pub use types::{DownloadOutput, DownloadRequest};
pub use ytdlp::{classify_download, parse_download_progress, YtDlpDownloader, OUTPUT_STEM};
