//! Advisory lock that keeps two processes from installing into the same
//! root at once. The OS drops the lock when the holder exits, so a crashed
//! install never leaves a stale lock behind.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::PathBuf;

use tracing::debug;

use super::layout::StateLayout;
use crate::domain::InstallError;

/// Held for the whole install; released on drop.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
    _file: File,
}

impl InstallLock {
    /// Take the lock without waiting.
    ///
    /// Fails with [`InstallError::Locked`] when another process holds it.
    pub async fn acquire(layout: &StateLayout) -> Result<Self, InstallError> {
        let path = layout.lock_file();
        tokio::task::spawn_blocking(move || -> Result<Self, InstallError> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    InstallError::io(format!("creating {}", parent.display()), e)
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .map_err(|e| InstallError::io(format!("opening {}", path.display()), e))?;
            match file.try_lock() {
                Ok(()) => {
                    debug!("Acquired install lock {}", path.display());
                    Ok(Self { path, _file: file })
                }
                Err(TryLockError::WouldBlock) => Err(InstallError::Locked { path }),
                Err(TryLockError::Error(e)) => Err(InstallError::io(
                    format!("locking {}", path.display()),
                    e,
                )),
            }
        })
        .await
        .map_err(|e| InstallError::Unknown(format!("lock task failed: {e}")))?
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}
