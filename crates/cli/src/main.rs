use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mediafetch_core::metrics::register_metrics;
use mediafetch_core::{
    load_config, load_config_from_env, validate_config, Config, Downloader, FfmpegTranscoder,
    JobRequest, JobRunner, JobScheduler, JobUpdate, MediaFormat, ProcessRunner, SchedulerError,
    TokioProcessRunner, Transcoder, WorkspaceManager, YtDlpDownloader,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Download media with yt-dlp and convert it with ffmpeg.
#[derive(Debug, Parser)]
#[command(name = "mediafetch", version)]
struct Cli {
    /// Source URLs (http or https)
    #[arg(required = true)]
    urls: Vec<String>,

    /// Target format: mp3, m4a, opus, ogg, flac, wav, mp4, mkv or webm
    #[arg(short, long, default_value = "mp3")]
    format: MediaFormat,

    /// Configuration file (TOML)
    #[arg(short, long, env = "MEDIAFETCH_CONFIG")]
    config: Option<PathBuf>,

    /// Directory finished files are delivered to
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Number of jobs to run at once
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Do not check that yt-dlp, ffmpeg and ffprobe can be launched
    #[arg(long)]
    skip_tool_check: bool,

    /// Write Prometheus metrics to this file when done
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    #[arg(long, env = "MEDIAFETCH_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = build_config(&cli)?;
    validate_config(&config).context("Configuration validation failed")?;
    info!(
        max_concurrent_jobs = config.scheduler.max_concurrent_jobs,
        output_dir = %config.workspace.output_dir.display(),
        "Configuration loaded"
    );

    let registry = Registry::new();
    register_metrics(&registry).context("Failed to register metrics")?;

    let process_runner: Arc<dyn ProcessRunner> =
        Arc::new(TokioProcessRunner::new(config.process.clone()));
    let downloader: Arc<dyn Downloader> = Arc::new(YtDlpDownloader::new(
        config.downloader.clone(),
        Arc::clone(&process_runner),
    ));
    let transcoder: Arc<dyn Transcoder> = Arc::new(FfmpegTranscoder::new(
        config.transcoder.clone(),
        Arc::clone(&process_runner),
    ));

    if !cli.skip_tool_check {
        downloader
            .validate()
            .await
            .map_err(|e| anyhow!("{} is not usable: {}", downloader.name(), e))?;
        transcoder
            .validate()
            .await
            .map_err(|e| anyhow!("{} is not usable: {}", transcoder.name(), e))?;
        info!("External tools validated");
    }

    let runner = JobRunner::new(
        downloader,
        transcoder,
        WorkspaceManager::new(config.workspace.clone()),
        config.retry.clone(),
    );
    let scheduler = Arc::new(JobScheduler::new(config.scheduler.clone(), runner));
    scheduler
        .start()
        .await
        .context("Failed to start scheduler")?;

    let printer = tokio::spawn(log_updates(scheduler.subscribe()));

    let mut failed = 0usize;
    let mut submitted = Vec::new();
    for url in &cli.urls {
        let admitted = JobRequest::new(url, cli.format)
            .map_err(SchedulerError::from)
            .and_then(|request| scheduler.submit(request));
        match admitted {
            Ok(id) => submitted.push((url.clone(), id)),
            Err(e) => {
                error!(url = %url, error = %e, "Job rejected");
                failed += 1;
            }
        }
    }

    let all_done = futures::future::join_all(submitted.iter().map(|(_, id)| scheduler.wait(id)));
    tokio::select! {
        _ = all_done => {}
        _ = shutdown_signal() => warn!("Interrupted, cancelling jobs"),
    }
    scheduler.shutdown().await;
    printer.abort();

    for (url, id) in &submitted {
        match scheduler.result(id) {
            Ok(output) => println!("{}\t{}", url, output.path.display()),
            Err(e) => {
                failed += 1;
                eprintln!("{}\t{}", url, e);
            }
        }
    }

    if let Some(path) = &cli.metrics_out {
        write_metrics(&registry, path)?;
    }

    if failed > 0 {
        anyhow::bail!("{} of {} jobs did not complete", failed, cli.urls.len());
    }
    Ok(())
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// File config (or environment only) with command line overrides applied.
fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            load_config(path).with_context(|| format!("Failed to load config from {:?}", path))?
        }
        None => load_config_from_env().context("Failed to load config from environment")?,
    };

    if let Some(dir) = &cli.output_dir {
        config.workspace.output_dir = dir.clone();
    }
    if let Some(jobs) = cli.jobs {
        config.scheduler.max_concurrent_jobs = jobs;
        config.workspace.max_workspaces = config.workspace.max_workspaces.max(jobs);
    }
    // Every URL given on the command line must be admitted.
    config.scheduler.queue_capacity = config.scheduler.queue_capacity.max(cli.urls.len());
    Ok(config)
}

async fn log_updates(mut updates: broadcast::Receiver<JobUpdate>) {
    loop {
        match updates.recv().await {
            Ok(JobUpdate::StateChanged { id, from, to, .. }) => {
                info!(job_id = %id, from = %from, to = %to, "Job state changed");
            }
            Ok(JobUpdate::Progress {
                id,
                stage,
                percent,
                message,
            }) => {
                info!(
                    job_id = %id,
                    stage = %stage,
                    percent,
                    message = message.as_deref().unwrap_or(""),
                    "Progress"
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Dropped progress updates");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn write_metrics(registry: &Registry, path: &Path) -> Result<()> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    std::fs::write(path, buffer)
        .with_context(|| format!("Failed to write metrics to {:?}", path))?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
