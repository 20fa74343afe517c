//! Target media formats.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Output format a job can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    /// MPEG Audio Layer III
    Mp3,
    /// AAC in an MPEG-4 audio container
    M4a,
    /// Opus
    Opus,
    /// Ogg Vorbis
    Ogg,
    /// Free Lossless Audio Codec
    Flac,
    /// WAVE (uncompressed)
    Wav,
    /// MPEG-4 Part 14 (H.264 + AAC)
    Mp4,
    /// Matroska (streams copied as-is)
    Mkv,
    /// WebM (VP9 + Opus)
    Webm,
}

impl MediaFormat {
    pub const ALL: [MediaFormat; 9] = [
        Self::Mp3,
        Self::M4a,
        Self::Opus,
        Self::Ogg,
        Self::Flac,
        Self::Wav,
        Self::Mp4,
        Self::Mkv,
        Self::Webm,
    ];

    /// File extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Opus => "opus",
            Self::Ogg => "ogg",
            Self::Flac => "flac",
            Self::Wav => "wav",
            Self::Mp4 => "mp4",
            Self::Mkv => "mkv",
            Self::Webm => "webm",
        }
    }

    /// Whether the output carries no video stream.
    pub fn is_audio_only(&self) -> bool {
        !matches!(self, Self::Mp4 | Self::Mkv | Self::Webm)
    }

    /// Whether a file with the given extension is already in this format.
    pub fn matches_extension(&self, extension: &str) -> bool {
        extension.eq_ignore_ascii_case(self.extension())
    }

    /// Whether the file at `path` is already in this format.
    pub fn matches_path(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.matches_extension(e))
            .unwrap_or(false)
    }

    /// ffmpeg codec arguments producing this format.
    pub fn ffmpeg_args(&self, audio_bitrate_kbps: u32, video_crf: u8) -> Vec<String> {
        let bitrate = format!("{}k", audio_bitrate_kbps);
        let args: Vec<&str> = match self {
            Self::Mp3 => vec!["-vn", "-c:a", "libmp3lame", "-b:a", &bitrate],
            Self::M4a => vec!["-vn", "-c:a", "aac", "-b:a", &bitrate],
            Self::Opus => vec!["-vn", "-c:a", "libopus", "-b:a", &bitrate],
            Self::Ogg => vec!["-vn", "-c:a", "libvorbis", "-b:a", &bitrate],
            Self::Flac => vec!["-vn", "-c:a", "flac"],
            Self::Wav => vec!["-vn", "-c:a", "pcm_s16le"],
            Self::Mkv => vec!["-map", "0", "-c", "copy"],
            Self::Mp4 | Self::Webm => Vec::new(),
        };
        let mut args: Vec<String> = args.into_iter().map(String::from).collect();

        let crf = video_crf.to_string();
        match self {
            Self::Mp4 => args.extend(
                [
                    "-c:v", "libx264", "-crf", &crf, "-preset", "medium", "-c:a", "aac", "-b:a",
                    &bitrate, "-movflags", "+faststart",
                ]
                .map(String::from),
            ),
            Self::Webm => args.extend(
                [
                    "-c:v", "libvpx-vp9", "-crf", &crf, "-b:v", "0", "-c:a", "libopus", "-b:a",
                    &bitrate,
                ]
                .map(String::from),
            ),
            _ => {}
        }
        args
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Error for unrecognised format names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported output format: {0}")]
pub struct UnsupportedFormat(pub String);

impl FromStr for MediaFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "mp3" => Ok(Self::Mp3),
            "m4a" | "aac" => Ok(Self::M4a),
            "opus" => Ok(Self::Opus),
            "ogg" | "vorbis" => Ok(Self::Ogg),
            "flac" => Ok(Self::Flac),
            "wav" | "wave" => Ok(Self::Wav),
            "mp4" => Ok(Self::Mp4),
            "mkv" | "matroska" => Ok(Self::Mkv),
            "webm" => Ok(Self::Webm),
            _ => Err(UnsupportedFormat(s.to_string())),
        }
    }
}
