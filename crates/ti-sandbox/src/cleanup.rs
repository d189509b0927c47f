//! Best-effort deletion of directories that could not be removed in time.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Directories scheduled for deletion at a later point.
///
/// Shared by all jobs of a runtime. Whatever is still pending when the value is
/// dropped gets one final deletion attempt.
#[derive(Debug, Default)]
pub struct DeferredCleanup {
    pending: Mutex<Vec<PathBuf>>,
}

impl DeferredCleanup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, path: &Path) {
        debug!("Scheduling deferred deletion of {}", path.display());
        if let Ok(mut pending) = self.pending.lock() {
            if !pending.iter().any(|p| p == path) {
                pending.push(path.to_path_buf());
            }
        }
    }

    pub fn pending(&self) -> Vec<PathBuf> {
        self.pending.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Retry every scheduled deletion, returning how many remain.
    pub fn retry(&self) -> usize {
        let Ok(mut pending) = self.pending.lock() else {
            return 0;
        };
        pending.retain(|path| match remove_tree(path) {
            Ok(()) => false,
            Err(e) => {
                warn!("Deferred deletion of {} failed: {}", path.display(), e);
                true
            }
        });
        pending.len()
    }
}

impl Drop for DeferredCleanup {
    fn drop(&mut self) {
        self.retry();
    }
}

/// Remove a directory tree; a missing directory is not an error.
pub(crate) fn remove_tree(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_removes_scheduled_directories() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("left-over");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("nested/file.txt"), "x").unwrap();

        let cleanup = DeferredCleanup::new();
        cleanup.schedule(&dir);
        cleanup.schedule(&dir);
        assert_eq!(cleanup.pending().len(), 1);

        assert_eq!(cleanup.retry(), 0);
        assert!(!dir.exists());
    }

    #[test]
    fn test_drop_retries_pending() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("on-drop");
        std::fs::create_dir_all(&dir).unwrap();
        {
            let cleanup = DeferredCleanup::new();
            cleanup.schedule(&dir);
        }
        assert!(!dir.exists());
    }
}
