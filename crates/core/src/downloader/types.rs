//! Types for the downloader module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::media::MediaFormat;

/// What to download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub job_id: String,
    pub url: String,
    /// Final format the job wants. Drives stream selection.
    pub format: MediaFormat,
}

/// A downloaded file inside the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutput {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl DownloadOutput {
    /// Extension of the downloaded file, lowercased.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}
