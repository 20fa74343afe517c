//! Types for the transcoder module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::media::MediaFormat;

/// A conversion of one workspace file into the target format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeRequest {
    pub job_id: String,
    pub input_path: PathBuf,
    pub format: MediaFormat,
}

impl TranscodeRequest {
    /// Output path next to the input: `raw.mp4` becomes `raw.mp3`.
    pub fn output_path(&self) -> PathBuf {
        let ext = self.format.extension();
        if self.format.matches_path(&self.input_path) {
            let stem = self
                .input_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.input_path
                .with_file_name(format!("{}.transcoded.{}", stem, ext))
        } else {
            self.input_path.with_extension(ext)
        }
    }
}

/// The converted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeOutput {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Media file information from ffprobe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Container format name (first of ffprobe's comma separated list).
    pub format: String,
    /// Duration in seconds, `None` when ffprobe could not tell.
    pub duration_secs: Option<f64>,
    pub size_bytes: Option<u64>,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
}

impl MediaInfo {
    pub fn has_video(&self) -> bool {
        self.video_codec.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_swaps_extension() {
        let request = TranscodeRequest {
            job_id: "j".into(),
            input_path: PathBuf::from("/w/raw.mp4"),
            format: MediaFormat::Mp3,
        };
        assert_eq!(request.output_path(), PathBuf::from("/w/raw.mp3"));
    }

    #[test]
    fn test_output_path_never_overwrites_input() {
        let request = TranscodeRequest {
            job_id: "j".into(),
            input_path: PathBuf::from("/w/raw.mkv"),
            format: MediaFormat::Mkv,
        };
        assert_eq!(request.output_path(), PathBuf::from("/w/raw.transcoded.mkv"));
    }
}
