use crate::config::TMP_PREFIX;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

const REMOVE_ATTEMPTS: u32 = 5;
const REMOVE_BACKOFF: Duration = Duration::from_secs(1);

/// Owns the per-job temporary workspaces under the temp root.
#[derive(Clone, Debug)]
pub struct Janitor {
    root: PathBuf,
    prefix: String,
    attempts: u32,
    backoff: Duration,
}

impl Janitor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            prefix: String::from(TMP_PREFIX),
            attempts: REMOVE_ATTEMPTS,
            backoff: REMOVE_BACKOFF,
        }
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// Create a fresh, uniquely named workspace directory.
    pub async fn acquire_workspace(&self) -> io::Result<PathBuf> {
        let root = self.root.clone();
        let prefix = self.prefix.clone();
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(&prefix)
                .tempdir_in(&root)
                .map(|dir| dir.keep())
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
        debug!("Created workspace {:?}", dir);
        Ok(dir)
    }

    /// Remove a workspace. Failures are logged, never returned.
    pub async fn release(&self, path: &Path) {
        if let Err(e) = self.remove_with_retry(path).await {
            error!("Failed to remove workspace {:?}: {}", path, e);
        }
    }

    /// Remove every entry under the temp root that carries our prefix.
    ///
    /// Meant to run once at startup, before any job is scheduled.
    pub async fn sweep_orphans(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to scan {:?} for orphaned workspaces: {}", self.root, e);
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read temp root entry: {}", e);
                    break;
                }
            };
            if !entry.file_name().to_string_lossy().starts_with(&self.prefix) {
                continue;
            }
            let path = entry.path();
            match self.remove_with_retry(&path).await {
                Ok(()) => {
                    info!("Deleted temporary folder {:?}", path);
                    removed += 1;
                }
                Err(e) => error!("Failed to delete temporary folder {:?}: {}", path, e),
            }
        }
        removed
    }

    async fn remove_with_retry(&self, path: &Path) -> io::Result<()> {
        let mut attempt = 1;
        loop {
            match remove_entry(path).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(e) => {
                    debug!("Removing {:?} failed (attempt {}): {}", path, attempt, e);
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}

async fn remove_entry(path: &Path) -> io::Result<()> {
    let metadata = tokio::fs::symlink_metadata(path).await?;
    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn janitor(root: &Path) -> Janitor {
        Janitor::new(root).with_retry(2, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_acquire_creates_prefixed_dir() {
        let root = tempdir().unwrap();
        let janitor = janitor(root.path());

        let a = janitor.acquire_workspace().await.unwrap();
        let b = janitor.acquire_workspace().await.unwrap();

        assert!(a.is_dir());
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with(TMP_PREFIX));
        assert_eq!(a.parent().unwrap(), root.path());
    }

    #[tokio::test]
    async fn test_release_removes_tree() {
        let root = tempdir().unwrap();
        let janitor = janitor(root.path());
        let ws = janitor.acquire_workspace().await.unwrap();
        std::fs::create_dir_all(ws.join("separated/htdemucs_ft/track")).unwrap();
        std::fs::write(ws.join("separated/htdemucs_ft/track/bass.wav"), b"x").unwrap();

        janitor.release(&ws).await;
        assert!(!ws.exists());

        // Releasing twice is harmless.
        janitor.release(&ws).await;
    }

    #[tokio::test]
    async fn test_sweep_only_touches_prefixed_entries() {
        let root = tempdir().unwrap();
        std::fs::create_dir(root.path().join(format!("{TMP_PREFIX}abc"))).unwrap();
        std::fs::write(root.path().join(format!("{TMP_PREFIX}stray")), b"x").unwrap();
        std::fs::create_dir(root.path().join("unrelated")).unwrap();

        let removed = janitor(root.path()).sweep_orphans().await;

        assert_eq!(removed, 2);
        assert!(root.path().join("unrelated").exists());
        assert!(!root.path().join(format!("{TMP_PREFIX}abc")).exists());
    }

    #[tokio::test]
    async fn test_sweep_missing_root_is_noop() {
        let root = tempdir().unwrap();
        let janitor = janitor(&root.path().join("missing"));
        assert_eq!(janitor.sweep_orphans().await, 0);
    }
}
