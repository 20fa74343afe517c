pub mod adapter;
pub mod config;
pub mod downloader;
pub mod job;
pub mod media;
pub mod metrics;
pub mod process;
pub mod scheduler;
pub mod testing;
pub mod transcoder;
pub mod workspace;

pub use adapter::{Classification, FailureKind, ProgressEvent, Stage, StageFailure};
pub use config::{
    load_config, load_config_from_env, load_config_from_str, validate_config, Config, ConfigError,
};
pub use downloader::{Downloader, DownloaderConfig, YtDlpDownloader};
pub use job::{
    CancelRequest, Job, JobFailure, JobId, JobOutput, JobRequest, JobRunner, JobState, JobUpdate,
    RetryConfig,
};
pub use media::MediaFormat;
pub use process::{ProcessConfig, ProcessRunner, TokioProcessRunner};
pub use scheduler::{JobScheduler, SchedulerConfig, SchedulerError, SchedulerStats};
pub use transcoder::{FfmpegTranscoder, Transcoder, TranscoderConfig};
pub use workspace::{WorkspaceConfig, WorkspaceManager};
