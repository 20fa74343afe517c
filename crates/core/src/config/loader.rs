use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

const ENV_PREFIX: &str = "MEDIAFETCH_";

/// Load configuration from file with environment variable overrides
///
/// Nested keys use a double underscore, e.g.
/// `MEDIAFETCH_SCHEDULER__MAX_CONCURRENT_JOBS=4`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from defaults and environment variables only
pub fn load_config_from_env() -> Result<Config, ConfigError> {
    Figment::new()
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[scheduler]
max_concurrent_jobs = 4
queue_capacity = 10

[retry]
max_retries = 5
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.scheduler.max_concurrent_jobs, 4);
        assert_eq!(config.scheduler.queue_capacity, 10);
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn test_load_config_from_str_bad_type() {
        let toml = r#"
[scheduler]
max_concurrent_jobs = "many"
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/mediafetch.toml"));
        assert!(matches!(result.unwrap_err(), ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[workspace]
base_dir = "/srv/mediafetch/work"
output_dir = "/srv/mediafetch/out"

[downloader]
ytdlp_path = "/usr/local/bin/yt-dlp"
timeout_secs = 600
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.workspace.base_dir.to_str(), Some("/srv/mediafetch/work"));
        assert_eq!(config.downloader.timeout_secs, 600);
        assert_eq!(config.transcoder.timeout_secs, 3600);
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "mediafetch.toml",
                r#"
[scheduler]
max_concurrent_jobs = 2
"#,
            )?;
            jail.set_env("MEDIAFETCH_SCHEDULER__MAX_CONCURRENT_JOBS", "6");

            let config = load_config(Path::new("mediafetch.toml")).unwrap();
            assert_eq!(config.scheduler.max_concurrent_jobs, 6);
            Ok(())
        });
    }
}
