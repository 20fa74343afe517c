//! Per-job scratch directories.
//!
//! Every job gets a fresh directory under the configured base path. The
//! [`Workspace`] handle records the files created in it and removes the whole
//! tree on [`Workspace::dispose`]; disposing twice is a no-op. A workspace that
//! is dropped without being disposed is removed on drop as a last resort.

mod config;
mod error;
mod manager;

pub use config::WorkspaceConfig;
pub use error::WorkspaceError;
pub use manager::{Workspace, WorkspaceManager};
