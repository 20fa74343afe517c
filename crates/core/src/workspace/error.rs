//! Error types for the workspace module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while allocating or using a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Disk space or the workspace quota is exhausted.
    #[error("resources exhausted: {reason}")]
    ResourceExhausted { reason: String },

    /// The workspace was already disposed.
    #[error("workspace already disposed: {}", path.display())]
    Disposed { path: PathBuf },

    /// A file name tried to escape the workspace.
    #[error("invalid workspace file name: {name}")]
    InvalidFileName { name: String },

    /// Filesystem error.
    #[error("workspace I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    pub fn exhausted(reason: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
