//! Workspace allocation and disposal.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::WorkspaceConfig;
use super::error::WorkspaceError;

/// Allocates isolated job directories under a base path.
///
/// Cheap to clone; clones share the active workspace counter.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    config: Arc<WorkspaceConfig>,
    active: Arc<AtomicUsize>,
}

impl WorkspaceManager {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self {
            config: Arc::new(config),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Number of workspaces acquired and not yet disposed.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Directory the finished output of `job_id` is moved into.
    pub fn output_dir_for(&self, job_id: &str) -> PathBuf {
        self.config.output_dir.join(job_id)
    }

    /// Creates the base and output directories and removes leftovers from a
    /// previous run. Returns how many stale entries were removed.
    pub async fn prepare(&self) -> Result<usize, WorkspaceError> {
        let base = &self.config.base_dir;
        tokio::fs::create_dir_all(base)
            .await
            .map_err(|e| WorkspaceError::io(base, e))?;
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| WorkspaceError::io(&self.config.output_dir, e))?;

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(base)
            .await
            .map_err(|e| WorkspaceError::io(base, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WorkspaceError::io(base, e))?
        {
            let path = entry.path();
            let result = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale workspace entry"),
            }
        }

        if removed > 0 {
            info!(removed, base = %base.display(), "Removed stale workspace entries");
        }
        Ok(removed)
    }

    /// Creates a fresh, empty directory named after `name`.
    pub async fn acquire(&self, name: &str) -> Result<Workspace, WorkspaceError> {
        validate_file_name(name)?;

        let previous = self.active.fetch_add(1, Ordering::SeqCst);
        if previous >= self.config.max_workspaces {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Err(WorkspaceError::exhausted(format!(
                "workspace quota of {} reached",
                self.config.max_workspaces
            )));
        }

        match self.create_dir(name).await {
            Ok(path) => {
                debug!(path = %path.display(), "Acquired workspace");
                Ok(Workspace {
                    path,
                    files: Mutex::new(BTreeSet::new()),
                    disposed: AtomicBool::new(false),
                    active: Arc::clone(&self.active),
                })
            }
            Err(e) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Disposes a workspace. Same as [`Workspace::dispose`].
    pub async fn dispose(&self, workspace: &Workspace) -> Result<bool, WorkspaceError> {
        workspace.dispose().await
    }

    async fn create_dir(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        let base = self.config.base_dir.clone();
        tokio::fs::create_dir_all(&base)
            .await
            .map_err(|e| classify_io(&base, e))?;

        if self.config.min_free_bytes > 0 {
            let probe = base.clone();
            let available = tokio::task::spawn_blocking(move || fs4::available_space(&probe))
                .await
                .map_err(|e| WorkspaceError::io(&base, std::io::Error::other(e)))?
                .map_err(|e| WorkspaceError::io(&base, e))?;

            if available < self.config.min_free_bytes {
                return Err(WorkspaceError::exhausted(format!(
                    "{} bytes free under {}, need at least {}",
                    available,
                    base.display(),
                    self.config.min_free_bytes
                )));
            }
        }

        let path = base.join(name);
        // `create_dir` fails if the directory exists, which keeps ownership exclusive.
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| classify_io(&path, e))?;
        Ok(path)
    }
}

/// An exclusively owned job directory.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    files: Mutex<BTreeSet<PathBuf>>,
    disposed: AtomicBool,
    active: Arc<AtomicUsize>,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Returns the path for a new file in the workspace and records it.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        validate_file_name(name)?;
        let path = self.path.join(name);
        self.track(&path)?;
        Ok(path)
    }

    /// Records a file created inside the workspace by someone else (a tool).
    pub fn track(&self, path: &Path) -> Result<(), WorkspaceError> {
        if self.is_disposed() {
            return Err(WorkspaceError::Disposed {
                path: self.path.clone(),
            });
        }
        if !path.starts_with(&self.path) {
            return Err(WorkspaceError::InvalidFileName {
                name: path.display().to_string(),
            });
        }
        self.files.lock().insert(path.to_path_buf());
        Ok(())
    }

    /// Files recorded so far.
    pub fn tracked_files(&self) -> Vec<PathBuf> {
        self.files.lock().iter().cloned().collect()
    }

    /// Removes the directory tree.
    ///
    /// Returns `Ok(true)` for the call that actually disposed the workspace
    /// and `Ok(false)` for every later call.
    pub async fn dispose(&self) -> Result<bool, WorkspaceError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let files = self.files.lock().len();
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), files, "Disposed workspace");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(WorkspaceError::io(&self.path, e)),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        warn!(path = %self.path.display(), "Workspace dropped without dispose, removing");
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove dropped workspace");
            }
        }
    }
}

fn validate_file_name(name: &str) -> Result<(), WorkspaceError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(WorkspaceError::InvalidFileName {
            name: name.to_string(),
        }),
    }
}

fn classify_io(path: &Path, e: std::io::Error) -> WorkspaceError {
    // ENOSPC / EDQUOT surface as StorageFull / QuotaExceeded.
    match e.kind() {
        ErrorKind::StorageFull | ErrorKind::QuotaExceeded => {
            WorkspaceError::exhausted(format!("{}: {}", path.display(), e))
        }
        _ => WorkspaceError::io(path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(root: &TempDir) -> WorkspaceManager {
        WorkspaceManager::new(
            WorkspaceConfig::with_dirs(root.path().join("work"), root.path().join("out"))
                .with_min_free_bytes(0),
        )
    }

    #[tokio::test]
    async fn test_acquire_creates_empty_directory() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);

        let workspace = manager.acquire("job-1").await.unwrap();
        assert!(workspace.path().is_dir());
        assert_eq!(std::fs::read_dir(workspace.path()).unwrap().count(), 0);
        assert_eq!(manager.active_count(), 1);

        workspace.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);

        let workspace = manager.acquire("job-1").await.unwrap();
        let file = workspace.file_path("raw.mp4").unwrap();
        std::fs::write(&file, b"data").unwrap();

        assert!(manager.dispose(&workspace).await.unwrap());
        assert!(!workspace.dispose().await.unwrap());
        assert!(!workspace.path().exists());
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_no_writes_after_dispose() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);

        let workspace = manager.acquire("job-1").await.unwrap();
        workspace.dispose().await.unwrap();

        let err = workspace.file_path("late.mp3").unwrap_err();
        assert!(matches!(err, WorkspaceError::Disposed { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);

        let first = manager.acquire("job-1").await.unwrap();
        assert!(manager.acquire("job-1").await.is_err());
        assert_eq!(manager.active_count(), 1);
        first.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_quota_exhaustion() {
        let root = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(
            WorkspaceConfig::with_dirs(root.path().join("work"), root.path().join("out"))
                .with_min_free_bytes(0)
                .with_max_workspaces(1),
        );

        let first = manager.acquire("a").await.unwrap();
        let err = manager.acquire("b").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::ResourceExhausted { .. }));

        first.dispose().await.unwrap();
        let second = manager.acquire("b").await.unwrap();
        second.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_disk_space_floor() {
        let root = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(
            WorkspaceConfig::with_dirs(root.path().join("work"), root.path().join("out"))
                .with_min_free_bytes(u64::MAX),
        );

        let err = manager.acquire("job-1").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::ResourceExhausted { .. }));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_file_names_cannot_escape() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);
        let workspace = manager.acquire("job-1").await.unwrap();

        assert!(workspace.file_path("../evil").is_err());
        assert!(workspace.file_path("a/b").is_err());
        assert!(workspace.track(Path::new("/etc/passwd")).is_err());
        assert!(manager.acquire("..").await.is_err());

        workspace.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);

        let path = {
            let workspace = manager.acquire("job-1").await.unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_prepare_purges_stale_entries() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);
        let stale = root.path().join("work").join("old-job");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("raw.mp4"), b"x").unwrap();

        let removed = manager.prepare().await.unwrap();
        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(root.path().join("out").is_dir());
    }
}
