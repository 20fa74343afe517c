//! Transcoder adapter.
//!
//! Converts the downloaded file into the requested [`MediaFormat`] with
//! `ffmpeg`. Before converting, the input is probed with `ffprobe` so the
//! `-progress` output can be turned into a percentage.
//!
//! [`MediaFormat`]: crate::media::MediaFormat

mod config;
mod ffmpeg;
mod probe;
mod traits;
mod types;

pub use config::TranscoderConfig;
pub use ffmpeg::{classify_transcode, FfmpegProgressParser, FfmpegTranscoder};
pub use probe::parse_probe_output;
pub use traits::Transcoder;
pub use types::{MediaInfo, TranscodeOutput, TranscodeRequest};
