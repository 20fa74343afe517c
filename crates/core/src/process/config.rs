//! Configuration for the process runner.

use serde::{Deserialize, Serialize};

/// Configuration shared by every supervised process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Maximum bytes retained per output stream (older output is dropped).
    #[serde(default = "default_output_limit")]
    pub output_limit_bytes: usize,

    /// Time between the graceful termination signal and the forced kill.
    #[serde(default = "default_grace")]
    pub termination_grace_ms: u64,
}

fn default_output_limit() -> usize {
    64 * 1024
}

fn default_grace() -> u64 {
    5000
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            output_limit_bytes: default_output_limit(),
            termination_grace_ms: default_grace(),
        }
    }
}

impl ProcessConfig {
    /// Sets the per-stream output limit.
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }

    /// Sets the termination grace period in milliseconds.
    pub fn with_grace_ms(mut self, grace_ms: u64) -> Self {
        self.termination_grace_ms = grace_ms;
        self
    }
}
