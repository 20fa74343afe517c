//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the job scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of jobs running at once.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Maximum number of jobs waiting for a slot.
    /// Submissions beyond this are rejected while every slot is busy.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long finished jobs and their outputs are kept (seconds).
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// How often the retention sweeper runs (seconds).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    32
}

fn default_retention_secs() -> u64 {
    86_400 // 1 day
}

fn default_sweep_interval_secs() -> u64 {
    300 // 5 minutes
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            queue_capacity: default_queue_capacity(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_concurrency(mut self, max_concurrent_jobs: usize) -> Self {
        self.max_concurrent_jobs = max_concurrent_jobs;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_retention(mut self, retention_secs: u64) -> Self {
        self.retention_secs = retention_secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.retention_secs, 86_400);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SchedulerConfig = toml::from_str("max_concurrent_jobs = 4").unwrap();
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.queue_capacity, 32);
    }
}
