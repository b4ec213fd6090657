//! Per-key serialization of session operations
//!
//! Operations on one (user, source) session run one at a time; different
//! sessions never contend. `KeyLocks` covers tasks inside one process. Lock
//! handles are created on demand and dropped once nobody holds or waits for
//! them. `FileKeyLock` extends the same rule to separate processes sharing
//! one store directory.

use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Default)]
pub struct KeyLocks {
    handles: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Exclusive access to one key until dropped
#[derive(Debug)]
pub struct KeyGuard<'a> {
    owner: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let handle = self.handles().entry(key.to_string()).or_default().clone();
        let guard = handle.lock_owned().await;
        diagnostics::debug!("Acquired session lock {key}", key: key);
        KeyGuard {
            owner: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or waited on
    pub fn active(&self) -> usize {
        self.handles().len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut handles = self.owner.handles();
        // Only the table itself still refers to the handle: nobody is waiting.
        if handles
            .get(&self.key)
            .is_some_and(|h| Arc::strong_count(h) == 1)
        {
            let _ = handles.remove(&self.key);
        }
    }
}

/// Advisory exclusive lock on `<dir>/<sha256(key) hex>.lock`, held until dropped
///
/// Lock files are never removed, so every process locks the same inode.
#[derive(Debug)]
pub struct FileKeyLock {
    file: File,
}

impl FileKeyLock {
    /// Wait for the lock on a blocking thread
    pub async fn acquire(dir: &Path, key: &str) -> std::io::Result<Self> {
        let path = dir.join(format!("{}.lock", hex::encode(Sha256::digest(key.as_bytes()))));
        let dir = dir.to_path_buf();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            std::fs::create_dir_all(&dir)?;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(std::io::Error::other)??;
        diagnostics::debug!("Acquired file lock for {key}", key: key);
        Ok(Self { file })
    }
}

impl Drop for FileKeyLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            diagnostics::warn!("Could not release file lock: {error}", error: e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_handles_released_when_idle() {
        let locks = KeyLocks::new();
        {
            let _a = locks.lock("a").await;
            let _b = locks.lock("b").await;
            assert_eq!(locks.active(), 2);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let inside = inside.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("same").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                let _ = inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_file_lock_excludes_second_holder() {
        let tmp = tempfile::TempDir::new().unwrap();
        let first = FileKeyLock::acquire(tmp.path(), "studio:ann:a.csv:meta").await.unwrap();

        let dir = tmp.path().to_path_buf();
        let second = tokio::spawn(async move { FileKeyLock::acquire(&dir, "studio:ann:a.csv:meta").await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        // Other keys are independent.
        let other = tokio::time::timeout(
            Duration::from_secs(1),
            FileKeyLock::acquire(tmp.path(), "studio:bob:a.csv:meta"),
        )
        .await;
        assert!(matches!(other, Ok(Ok(_))));

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(5), second).await;
        assert!(matches!(second, Ok(Ok(Ok(_)))));
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock("b")).await;
        assert!(b.is_ok());
    }
}
