//! Cross-process exclusion for lifecycle pipelines

use fd_lock::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;

use super::store::StoreError;

const LOCK_FILE: &str = "kubeapp.lock";

/// Advisory lock on a file in the state directory.
///
/// Every kubeapp process pointed at the same state directory contends on
/// it, so pipelines run one at a time across processes.
#[derive(Debug, Clone)]
pub struct StateLock {
    path: PathBuf,
}

/// Holds the lock until dropped
pub struct StateLockGuard {
    release: Option<oneshot::Sender<()>>,
}

impl StateLock {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(LOCK_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the lock and take it.
    ///
    /// `flock` blocks, so the lock is taken and held on a blocking thread
    /// that parks until the guard is dropped.
    pub async fn acquire(&self) -> Result<StateLockGuard, StoreError> {
        let path = self.path.clone();
        let (locked_tx, locked_rx) = oneshot::channel::<io::Result<()>>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        tokio::task::spawn_blocking(move || {
            let file = match open_lock_file(&path) {
                Ok(file) => file,
                Err(e) => {
                    let _ = locked_tx.send(Err(e));
                    return;
                }
            };
            let mut lock = RwLock::new(file);
            match lock.write() {
                Ok(_held) => {
                    // A dropped receiver means the caller gave up waiting
                    if locked_tx.send(Ok(())).is_ok() {
                        let _ = release_rx.blocking_recv();
                    }
                }
                Err(e) => {
                    let _ = locked_tx.send(Err(e));
                }
            }
        });

        let locked = locked_rx
            .await
            .unwrap_or_else(|_| Err(io::Error::other("lock holder exited early")));
        match locked {
            Ok(()) => {
                tracing::debug!("Acquired {}", self.path.display());
                Ok(StateLockGuard {
                    release: Some(release_tx),
                })
            }
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for StateLockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
}
