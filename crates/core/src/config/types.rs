use serde::{Deserialize, Serialize};

use crate::downloader::DownloaderConfig;
use crate::job::RetryConfig;
use crate::process::ProcessConfig;
use crate::scheduler::SchedulerConfig;
use crate::transcoder::TranscoderConfig;
use crate::workspace::WorkspaceConfig;

/// Root configuration
///
/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub process: ProcessConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.scheduler.max_concurrent_jobs, 2);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.downloader.ytdlp_path.to_str(), Some("yt-dlp"));
        assert_eq!(config.transcoder.audio_bitrate_kbps, 192);
    }

    #[test]
    fn test_serialize_roundtrip_keeps_sections() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("[scheduler]"));
        assert!(text.contains("[transcoder]"));
    }
}
