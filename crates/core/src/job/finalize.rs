//! Moving a finished output out of the workspace.

use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

use super::types::JobOutput;
use crate::adapter::StageFailure;

/// Moves `source` into `dest_dir`, keeping its file name.
///
/// Tries a rename first and falls back to copy-and-remove when the output
/// directory lives on another filesystem. The delivered file must exist and
/// be non-empty.
pub async fn deliver_output(source: &Path, dest_dir: &Path) -> Result<JobOutput, StageFailure> {
    let size_bytes = match tokio::fs::metadata(source).await {
        Ok(meta) if meta.len() > 0 => meta.len(),
        Ok(_) => return Err(StageFailure::fatal("output file is empty")),
        Err(_) => {
            return Err(StageFailure::fatal(format!(
                "output file missing: {}",
                source.display()
            )))
        }
    };

    let file_name = source
        .file_name()
        .ok_or_else(|| StageFailure::fatal("output path has no file name"))?;
    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| io_failure("failed to create output directory", dest_dir, e))?;
    let dest = dest_dir.join(file_name);

    if let Err(e) = tokio::fs::rename(source, &dest).await {
        debug!(error = %e, "Rename failed, copying output instead");
        if let Err(e) = tokio::fs::copy(source, &dest).await {
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(io_failure("failed to copy output", &dest, e));
        }
        let _ = tokio::fs::remove_file(source).await;
    }

    match tokio::fs::metadata(&dest).await {
        Ok(meta) if meta.len() == size_bytes => Ok(JobOutput {
            path: dest,
            size_bytes,
        }),
        Ok(meta) => Err(StageFailure::fatal(format!(
            "delivered output has {} bytes, expected {}",
            meta.len(),
            size_bytes
        ))),
        Err(e) => Err(io_failure("delivered output missing", &dest, e)),
    }
}

fn io_failure(what: &str, path: &Path, e: std::io::Error) -> StageFailure {
    let reason = match e.kind() {
        ErrorKind::StorageFull | ErrorKind::QuotaExceeded => "disk full".to_string(),
        _ => format!("{} at {}: {}", what, path.display(), e),
    };
    StageFailure::fatal(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_moves_file_into_output_dir() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("raw.mp3");
        std::fs::write(&source, b"mp3").unwrap();
        let dest_dir = root.path().join("out").join("job-1");

        let output = deliver_output(&source, &dest_dir).await.unwrap();

        assert_eq!(output.path, dest_dir.join("raw.mp3"));
        assert_eq!(output.size_bytes, 3);
        assert!(!source.exists());
        assert_eq!(std::fs::read(&output.path).unwrap(), b"mp3");
    }

    #[tokio::test]
    async fn test_empty_output_is_rejected() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("raw.mp3");
        std::fs::write(&source, b"").unwrap();

        let failure = deliver_output(&source, &root.path().join("out"))
            .await
            .unwrap_err();
        assert_eq!(failure.reason, "output file is empty");
        assert!(!failure.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_output_is_rejected() {
        let root = TempDir::new().unwrap();
        let failure = deliver_output(&root.path().join("nope.mp3"), root.path())
            .await
            .unwrap_err();
        assert!(failure.reason.starts_with("output file missing"));
    }
}
