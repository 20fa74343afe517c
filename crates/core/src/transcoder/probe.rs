//! ffprobe output parsing.

use serde::Deserialize;

use super::types::MediaInfo;

#[derive(Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    format_name: String,
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: String,
    codec_name: Option<String>,
}

/// Parses `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_output(output: &str) -> Result<MediaInfo, serde_json::Error> {
    let probe: ProbeOutput = serde_json::from_str(output)?;

    let duration_secs = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    let size_bytes = probe.format.size.as_ref().and_then(|s| s.parse::<u64>().ok());

    let codec = |kind: &str| {
        probe
            .streams
            .iter()
            .find(|s| s.codec_type == kind)
            .and_then(|s| s.codec_name.clone())
    };

    let format = probe
        .format
        .format_name
        .split(',')
        .next()
        .unwrap_or("unknown")
        .to_string();

    Ok(MediaInfo {
        format,
        duration_secs,
        size_bytes,
        audio_codec: codec("audio"),
        video_codec: codec("video"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output_audio() {
        let json = r#"{
            "format": {
                "filename": "raw.webm",
                "format_name": "matroska,webm",
                "duration": "180.5",
                "size": "3000000"
            },
            "streams": [
                { "codec_type": "audio", "codec_name": "opus", "channels": 2 }
            ]
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.format, "matroska");
        assert!((info.duration_secs.unwrap() - 180.5).abs() < 0.01);
        assert_eq!(info.size_bytes, Some(3000000));
        assert_eq!(info.audio_codec.as_deref(), Some("opus"));
        assert!(!info.has_video());
    }

    #[test]
    fn test_parse_probe_output_video() {
        let json = r#"{
            "format": { "format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "7200.0" },
            "streams": [
                { "codec_type": "video", "codec_name": "h264", "width": 1920 },
                { "codec_type": "audio", "codec_name": "aac" }
            ]
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.format, "mov");
        assert_eq!(info.video_codec.as_deref(), Some("h264"));
        assert_eq!(info.audio_codec.as_deref(), Some("aac"));
        assert_eq!(info.size_bytes, None);
    }

    #[test]
    fn test_missing_duration_is_none() {
        let json = r#"{ "format": { "format_name": "mp3", "duration": "N/A" } }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.duration_secs, None);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(parse_probe_output("not json").is_err());
    }
}
