//! FFmpeg-based transcoder implementation.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::TranscoderConfig;
use super::probe::parse_probe_output;
use super::traits::Transcoder;
use super::types::{MediaInfo, TranscodeOutput, TranscodeRequest};
use crate::adapter::{
    run_observed, Classification, ProgressEvent, ProgressReporter, Stage, StageFailure,
};
use crate::media::MediaFormat;
use crate::process::{ProcessInvocation, ProcessResult, ProcessRunner};
use crate::workspace::Workspace;

/// Fragments of ffmpeg stderr that make a retry pointless.
/// Matched against lowercased output.
const FATAL_PATTERNS: &[(&str, &str)] = &[
    ("invalid data found when processing input", "input is not valid media"),
    ("unknown encoder", "unsupported codec"),
    ("encoder not found", "unsupported codec"),
    ("does not contain any stream", "input has no usable streams"),
    ("could not find tag for codec", "codec not supported by container"),
    ("not currently supported in container", "codec not supported by container"),
    ("no such file or directory", "input file missing"),
    ("no space left on device", "disk full"),
    ("permission denied", "permission denied"),
];

/// Fragments that point at a transient host condition.
const RETRYABLE_PATTERNS: &[(&str, &str)] = &[
    ("resource temporarily unavailable", "resource temporarily unavailable"),
    ("cannot allocate memory", "out of memory"),
];

/// FFmpeg-based transcoder implementation.
pub struct FfmpegTranscoder {
    config: TranscoderConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl FfmpegTranscoder {
    /// Creates a new FFmpeg transcoder with the given configuration.
    pub fn new(config: TranscoderConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    /// Builds ffmpeg arguments for converting `input` into `output`.
    fn build_args(&self, input: &Path, output: &Path, format: MediaFormat) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(), // Overwrite output
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
            // Progress output for parsing
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-nostats".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ];

        args.extend(format.ffmpeg_args(self.config.audio_bitrate_kbps, self.config.video_crf));
        args.extend(self.config.extra_ffmpeg_args.iter().cloned());
        args.push(output.to_string_lossy().to_string());
        args
    }

    /// Probes a media file. Failures are reported as `None`; the only effect
    /// is that progress is reported without a percentage.
    async fn probe(&self, path: &Path, cwd: &Path, cancel: &CancellationToken) -> Option<MediaInfo> {
        let invocation = ProcessInvocation::new(
            &self.config.ffprobe_path,
            cwd,
            Duration::from_secs(self.config.probe_timeout_secs),
        )
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path.to_string_lossy());

        match self.runner.run(&invocation, None, cancel.child_token()).await {
            Ok(result) if result.success() => match parse_probe_output(&result.stdout) {
                Ok(info) => Some(info),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Failed to parse ffprobe output");
                    None
                }
            },
            Ok(result) => {
                debug!(path = %path.display(), exit_code = ?result.exit_code, "ffprobe failed");
                None
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ffprobe could not run");
                None
            }
        }
    }

    async fn check_tool(&self, program: &Path) -> Result<(), StageFailure> {
        let invocation =
            ProcessInvocation::new(program, std::env::temp_dir(), Duration::from_secs(30))
                .arg("-version");
        let result = self
            .runner
            .run(&invocation, None, CancellationToken::new())
            .await?;
        if !result.success() {
            return Err(StageFailure::fatal(format!(
                "{} -version exited with {:?}",
                program.display(),
                result.exit_code
            ))
            .with_output(&result));
        }
        debug!(
            program = %program.display(),
            version = result.stdout.lines().next().unwrap_or(""),
            "Tool available"
        );
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn transcode(
        &self,
        request: &TranscodeRequest,
        workspace: &Workspace,
        progress: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Result<TranscodeOutput, StageFailure> {
        if tokio::fs::metadata(&request.input_path).await.is_err() {
            return Err(StageFailure::fatal(format!(
                "input file missing: {}",
                request.input_path.display()
            )));
        }

        let output_path = request.output_path();
        workspace
            .track(&output_path)
            .map_err(|e| StageFailure::fatal(e.to_string()))?;

        let info = self
            .probe(&request.input_path, workspace.path(), &cancel)
            .await;
        let parser = FfmpegProgressParser::new(info.as_ref().and_then(|i| i.duration_secs));

        let invocation = ProcessInvocation::new(
            &self.config.ffmpeg_path,
            workspace.path(),
            Duration::from_secs(self.config.timeout_secs),
        )
        .args(self.build_args(&request.input_path, &output_path, request.format));

        debug!(
            job_id = %request.job_id,
            input = %request.input_path.display(),
            format = %request.format,
            "Starting transcode"
        );

        let mut reporter = ProgressReporter::new(Stage::Transcode, progress);
        let result = run_observed(self.runner.as_ref(), &invocation, cancel, |line| {
            if let Some(event) = parser.parse_line(&line.text) {
                reporter.report(event);
            }
        })
        .await?;

        if let Some(failure) = classify_transcode(&result).into_failure(&result) {
            warn!(
                job_id = %request.job_id,
                exit_code = ?result.exit_code,
                reason = %failure.reason,
                "Transcode failed"
            );
            return Err(failure);
        }

        let size_bytes = verify_output(&output_path).await?;
        reporter.percent(100.0);

        info!(
            job_id = %request.job_id,
            path = %output_path.display(),
            size_bytes,
            duration_ms = result.duration.as_millis() as u64,
            "Transcode finished"
        );
        Ok(TranscodeOutput {
            path: output_path,
            size_bytes,
        })
    }

    async fn validate(&self) -> Result<(), StageFailure> {
        self.check_tool(&self.config.ffmpeg_path).await?;
        self.check_tool(&self.config.ffprobe_path).await?;
        Ok(())
    }
}

async fn verify_output(path: &Path) -> Result<u64, StageFailure> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(StageFailure::fatal("transcoder produced an empty file")),
        Err(_) => Err(StageFailure::fatal("transcoder produced no output file")),
    }
}

/// Classifies a finished ffmpeg run.
pub fn classify_transcode(result: &ProcessResult) -> Classification {
    if result.success() {
        return Classification::Success;
    }

    let output = format!("{}\n{}", result.stderr, result.stdout).to_lowercase();
    if let Some((_, reason)) = FATAL_PATTERNS.iter().find(|(p, _)| output.contains(p)) {
        return Classification::fatal(*reason);
    }
    if let Some((_, reason)) = RETRYABLE_PATTERNS.iter().find(|(p, _)| output.contains(p)) {
        return Classification::retryable(*reason);
    }

    match result.exit_code {
        None => Classification::retryable("transcoder killed by signal"),
        Some(code) => Classification::fatal(format!("transcoder exited with code {}", code)),
    }
}

/// Turns `-progress` key/value lines into progress events.
#[derive(Debug, Clone, Copy)]
pub struct FfmpegProgressParser {
    duration_secs: Option<f64>,
}

impl FfmpegProgressParser {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs: duration_secs.filter(|d| *d > 0.0),
        }
    }

    /// Parses one line. Lines that are not progress keys yield `None`.
    pub fn parse_line(&self, line: &str) -> Option<ProgressEvent> {
        let (key, value) = line.trim().split_once('=')?;
        match key {
            // Both keys carry microseconds despite the name.
            "out_time_us" | "out_time_ms" => {
                let Some(micros) = value.trim().parse::<i64>().ok().filter(|v| *v >= 0) else {
                    return Some(ProgressEvent::unknown(Stage::Transcode, "converting"));
                };
                let secs = micros as f64 / 1_000_000.0;
                match self.duration_secs {
                    Some(total) => Some(
                        ProgressEvent::percent(Stage::Transcode, (secs / total * 100.0).min(99.0))
                            .with_message(format!("{:.1}s of {:.1}s", secs, total)),
                    ),
                    None => Some(ProgressEvent::unknown(
                        Stage::Transcode,
                        format!("{:.1}s converted", secs),
                    )),
                }
            }
            "progress" if value.trim() == "end" => {
                Some(ProgressEvent::percent(Stage::Transcode, 100.0))
            }
            _ => None,
        }
    }
}
