use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Concurrency limit is not 0
/// - Stage timeouts are not 0
/// - Backoff multiplier is at least 1.0
/// - Output directory is not inside the workspace base (startup purges it)
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.scheduler.max_concurrent_jobs == 0 {
        return Err(invalid("scheduler.max_concurrent_jobs cannot be 0"));
    }
    if config.downloader.timeout_secs == 0 {
        return Err(invalid("downloader.timeout_secs cannot be 0"));
    }
    if config.transcoder.timeout_secs == 0 {
        return Err(invalid("transcoder.timeout_secs cannot be 0"));
    }
    let multiplier = config.retry.backoff_multiplier;
    if multiplier.is_nan() || multiplier < 1.0 {
        return Err(invalid("retry.backoff_multiplier must be at least 1.0"));
    }
    if config.workspace.max_workspaces < config.scheduler.max_concurrent_jobs {
        return Err(invalid(
            "workspace.max_workspaces must be at least scheduler.max_concurrent_jobs",
        ));
    }

    let base = &config.workspace.base_dir;
    let output = &config.workspace.output_dir;
    if output.starts_with(base) || base.starts_with(output) {
        return Err(invalid(
            "workspace.output_dir and workspace.base_dir must not contain each other",
        ));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}
