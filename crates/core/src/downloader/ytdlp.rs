//! yt-dlp based downloader implementation.

use async_trait::async_trait;
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::DownloaderConfig;
use super::traits::Downloader;
use super::types::{DownloadOutput, DownloadRequest};
use crate::adapter::{
    run_observed, Classification, ProgressEvent, ProgressReporter, Stage, StageFailure,
};
use crate::process::{ProcessInvocation, ProcessResult, ProcessRunner};
use crate::workspace::Workspace;

/// File stem of the downloaded file inside the workspace.
pub const OUTPUT_STEM: &str = "raw";

/// Leftovers yt-dlp writes next to the real output.
const PARTIAL_EXTENSIONS: &[&str] = &["part", "ytdl", "temp", "tmp"];

/// Fragments of yt-dlp output that mean retrying will not help.
/// Matched against lowercased stderr/stdout.
const FATAL_PATTERNS: &[(&str, &str)] = &[
    ("video unavailable", "video unavailable"),
    ("this video is unavailable", "video unavailable"),
    ("unsupported url", "unsupported source"),
    ("is not a valid url", "invalid URL"),
    ("private video", "video is private"),
    ("not available in your country", "geo-restricted"),
    ("geo restriction", "geo-restricted"),
    ("sign in to confirm your age", "age-restricted"),
    ("http error 404", "not found (404)"),
    ("http error 410", "gone (410)"),
    ("no video formats found", "no downloadable formats"),
    ("requested format is not available", "requested format not available"),
    ("no space left on device", "disk full"),
    ("this live event will begin", "live event has not started"),
];

/// Fragments that point at a transient condition.
const RETRYABLE_PATTERNS: &[(&str, &str)] = &[
    ("http error 429", "rate limited"),
    ("too many requests", "rate limited"),
    ("http error 5", "server error"),
    ("timed out", "network timeout"),
    ("connection reset", "connection reset"),
    ("temporary failure in name resolution", "DNS failure"),
    ("unable to download webpage", "unable to download webpage"),
    ("incompleteread", "incomplete read"),
    ("http error 403", "forbidden (403)"),
    ("got error:", "transfer error"),
];

/// Downloader that drives `yt-dlp` through a [`ProcessRunner`].
pub struct YtDlpDownloader {
    config: DownloaderConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl YtDlpDownloader {
    /// Creates a new downloader with the given configuration.
    pub fn new(config: DownloaderConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Builds the yt-dlp invocation for a request.
    pub fn build_invocation(&self, request: &DownloadRequest, workspace: &Path) -> ProcessInvocation {
        let template = workspace.join(format!("{}.%(ext)s", OUTPUT_STEM));

        let mut invocation = ProcessInvocation::new(
            &self.config.ytdlp_path,
            workspace,
            Duration::from_secs(self.config.timeout_secs),
        )
        .args(["--newline", "--no-playlist", "--no-mtime"]);

        if request.format.is_audio_only() {
            invocation = invocation.args(["-f", self.config.audio_selector.as_str()]);
        } else {
            invocation = invocation.args([
                "-f",
                self.config.video_selector.as_str(),
                "--merge-output-format",
                request.format.extension(),
            ]);
        }

        invocation
            .arg("-o")
            .arg(template.to_string_lossy())
            .args(self.config.extra_args.iter().cloned())
            .arg("--")
            .arg(request.url.as_str())
    }

    async fn locate_output(&self, workspace: &Workspace) -> Result<DownloadOutput, StageFailure> {
        let path = find_output_file(workspace.path())
            .await
            .map_err(|e| StageFailure::retryable(format!("failed to scan workspace: {}", e)))?
            .ok_or_else(|| StageFailure::fatal("downloader reported success but wrote no file"))?;

        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map_err(|e| StageFailure::retryable(format!("failed to stat download: {}", e)))?
            .len();
        if size_bytes == 0 {
            return Err(StageFailure::retryable("downloaded file is empty"));
        }

        workspace
            .track(&path)
            .map_err(|e| StageFailure::fatal(e.to_string()))?;
        Ok(DownloadOutput { path, size_bytes })
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        workspace: &Workspace,
        progress: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Result<DownloadOutput, StageFailure> {
        // yt-dlp treats a finished file from an earlier attempt as already
        // downloaded, even when that attempt died mid-transfer.
        let removed = remove_finished_outputs(workspace.path())
            .await
            .map_err(|e| StageFailure::retryable(format!("failed to clear workspace: {}", e)))?;
        if removed > 0 {
            debug!(job_id = %request.job_id, removed, "Removed output of an earlier attempt");
        }

        let invocation = self.build_invocation(request, workspace.path());
        debug!(job_id = %request.job_id, url = %request.url, "Starting download");

        let percent_re = Regex::new(PROGRESS_PATTERN).ok();
        let mut reporter = ProgressReporter::new(Stage::Download, progress);
        let result = run_observed(self.runner.as_ref(), &invocation, cancel, |line| {
            if let Some(event) = parse_download_progress(percent_re.as_ref(), &line.text) {
                reporter.report(event);
            }
        })
        .await?;

        if let Some(failure) = classify_download(&result).into_failure(&result) {
            warn!(
                job_id = %request.job_id,
                exit_code = ?result.exit_code,
                reason = %failure.reason,
                "Download failed"
            );
            return Err(failure);
        }

        let output = self.locate_output(workspace).await?;
        info!(
            job_id = %request.job_id,
            path = %output.path.display(),
            size_bytes = output.size_bytes,
            duration_ms = result.duration.as_millis() as u64,
            "Download finished"
        );
        Ok(output)
    }

    async fn validate(&self) -> Result<(), StageFailure> {
        let invocation = ProcessInvocation::new(
            &self.config.ytdlp_path,
            std::env::temp_dir(),
            Duration::from_secs(30),
        )
        .arg("--version");

        let result = self
            .runner
            .run(&invocation, None, CancellationToken::new())
            .await?;
        if !result.success() {
            return Err(StageFailure::fatal(format!(
                "{} --version exited with {:?}",
                self.config.ytdlp_path.display(),
                result.exit_code
            ))
            .with_output(&result));
        }
        info!(version = %result.stdout.trim(), "yt-dlp available");
        Ok(())
    }
}

const PROGRESS_PATTERN: &str = r"^\[download\]\s+(\d{1,3}(?:\.\d+)?)%";

/// Parses one line of yt-dlp output.
///
/// `[download]` lines with a percentage become a progress figure, other
/// `[download]` and post-processing lines become "percent unknown" events.
/// Anything else is ignored.
pub fn parse_download_progress(percent_re: Option<&Regex>, line: &str) -> Option<ProgressEvent> {
    let line = line.trim();
    if let Some(caps) = percent_re.and_then(|re| re.captures(line)) {
        if let Some(pct) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) {
            return Some(ProgressEvent::percent(Stage::Download, pct));
        }
    }

    if line.starts_with("[download]") {
        let message = line.trim_start_matches("[download]").trim();
        return Some(ProgressEvent::unknown(Stage::Download, message));
    }
    if line.starts_with("[Merger]") || line.starts_with("[ExtractAudio]") {
        return Some(ProgressEvent::unknown(Stage::Download, line));
    }
    None
}

/// Classifies a finished yt-dlp run.
pub fn classify_download(result: &ProcessResult) -> Classification {
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
        None => Classification::retryable("downloader killed by signal"),
        // yt-dlp uses 2 for option errors
        Some(2) => Classification::fatal("downloader rejected its options"),
        Some(code) => Classification::retryable(format!("downloader exited with code {}", code)),
    }
}

/// Whether `path` is a completed `raw.<ext>` file name, not a partial one.
fn is_finished_output(path: &Path) -> bool {
    let stem_matches = path.file_stem().and_then(|s| s.to_str()) == Some(OUTPUT_STEM);
    let partial = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| PARTIAL_EXTENSIONS.contains(&e))
        .unwrap_or(true);
    stem_matches && !partial
}

async fn find_output_file(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut best: Option<(PathBuf, u64)> = None;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_finished_output(&path) {
            continue;
        }

        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        if best.as_ref().map(|(_, size)| metadata.len() > *size).unwrap_or(true) {
            best = Some((path, metadata.len()));
        }
    }
    Ok(best.map(|(path, _)| path))
}

/// Deletes completed-looking outputs. `.part` files stay so yt-dlp can resume.
async fn remove_finished_outputs(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_finished_output(&path) && entry.file_type().await?.is_file() {
            tokio::fs::remove_file(&path).await?;
            removed += 1;
        }
    }
    Ok(removed)
}
