//! Configuration for workspace allocation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where job directories and finished outputs live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Base directory holding one subdirectory per running job.
    /// The service assumes nothing else writes here.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Directory finished outputs are moved into, one subdirectory per job.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Refuse new workspaces when the base filesystem has less free space.
    #[serde(default = "default_min_free_bytes")]
    pub min_free_bytes: u64,

    /// Maximum number of workspaces alive at once.
    #[serde(default = "default_max_workspaces")]
    pub max_workspaces: usize,
}

fn default_base_dir() -> PathBuf {
    std::env::temp_dir().join("mediafetch").join("work")
}

fn default_output_dir() -> PathBuf {
    std::env::temp_dir().join("mediafetch").join("output")
}

fn default_min_free_bytes() -> u64 {
    512 * 1024 * 1024 // 512 MiB
}

fn default_max_workspaces() -> usize {
    64
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            output_dir: default_output_dir(),
            min_free_bytes: default_min_free_bytes(),
            max_workspaces: default_max_workspaces(),
        }
    }
}

impl WorkspaceConfig {
    /// Creates a config rooted at the given directories.
    pub fn with_dirs(base_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            base_dir,
            output_dir,
            ..Default::default()
        }
    }

    /// Sets the free space floor.
    pub fn with_min_free_bytes(mut self, bytes: u64) -> Self {
        self.min_free_bytes = bytes;
        self
    }

    /// Sets the workspace count quota.
    pub fn with_max_workspaces(mut self, max: usize) -> Self {
        self.max_workspaces = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkspaceConfig::default();
        assert!(config.base_dir.ends_with("mediafetch/work"));
        assert!(config.output_dir.ends_with("mediafetch/output"));
        assert_eq!(config.max_workspaces, 64);
    }

    #[test]
    fn test_config_builder() {
        let config = WorkspaceConfig::with_dirs(PathBuf::from("/w"), PathBuf::from("/o"))
            .with_min_free_bytes(0)
            .with_max_workspaces(2);
        assert_eq!(config.base_dir, PathBuf::from("/w"));
        assert_eq!(config.output_dir, PathBuf::from("/o"));
        assert_eq!(config.min_free_bytes, 0);
        assert_eq!(config.max_workspaces, 2);
    }
}
