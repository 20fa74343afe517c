//! Configuration for the downloader adapter.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the yt-dlp based downloader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Path to the yt-dlp binary.
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: PathBuf,

    /// Timeout for a single download attempt in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Format selector used when the target keeps a video stream.
    #[serde(default = "default_video_selector")]
    pub video_selector: String,

    /// Format selector used for audio-only targets.
    #[serde(default = "default_audio_selector")]
    pub audio_selector: String,

    /// Additional yt-dlp arguments, inserted before the URL.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_ytdlp_path() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_video_selector() -> String {
    "bv*+ba/b".to_string()
}

fn default_audio_selector() -> String {
    "ba/b".to_string()
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: default_ytdlp_path(),
            timeout_secs: default_timeout(),
            video_selector: default_video_selector(),
            audio_selector: default_audio_selector(),
            extra_args: Vec::new(),
        }
    }
}

impl DownloaderConfig {
    /// Creates a config with a custom yt-dlp path.
    pub fn with_path(ytdlp_path: PathBuf) -> Self {
        Self {
            ytdlp_path,
            ..Default::default()
        }
    }

    /// Sets the timeout in seconds.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}
