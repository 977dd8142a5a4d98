//! System-wide guard against concurrent upgrades.
//!
//! The lock is an exclusive OS file lock on `old/.upgrade.lock`. It is held
//! for the whole upgrade or plugin flow and released when the guard is
//! dropped. All file operations run in `spawn_blocking` so the runtime is
//! never blocked.

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::debug;

use crate::constants::{MAX_BACKOFF_DELAY_MS, STARTING_BACKOFF_DELAY_MS, default_lock_timeout};
use crate::core::UpgradeError;

/// Lock file name inside the recovery directory.
pub const LOCK_FILE: &str = ".upgrade.lock";

/// Held while an upgrade runs.
#[derive(Debug)]
pub struct UpgradeLock {
    /// The lock is released when this handle is dropped
    _file: Arc<File>,
    lock_path: PathBuf,
}

impl Drop for UpgradeLock {
    fn drop(&mut self) {
        debug!(path = %self.lock_path.display(), "Upgrade lock released");
    }
}

impl UpgradeLock {
    /// Acquire the lock in `dir` with the default timeout.
    pub async fn acquire(dir: &Path) -> Result<Self> {
        Self::acquire_with_timeout(dir, default_lock_timeout()).await
    }

    /// Acquire the lock, retrying with exponential backoff (10ms to 500ms).
    ///
    /// Fails with [`UpgradeError::UpgradeInProgress`] when another holder
    /// keeps the lock for longer than `timeout`.
    pub async fn acquire_with_timeout(dir: &Path, timeout: Duration) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create lock directory: {}", dir.display()))?;

        let lock_path = dir.join(LOCK_FILE);
        let open_path = lock_path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new().create(true).write(true).truncate(false).open(&open_path)
        })
        .await
        .context("spawn_blocking panicked")?
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        let file = Arc::new(file);

        let start = std::time::Instant::now();
        let backoff = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS));

        for delay in backoff {
            let handle = Arc::clone(&file);
            let locked = tokio::task::spawn_blocking(move || handle.try_lock_exclusive())
                .await
                .context("spawn_blocking panicked")?;

            if let Ok(true) = locked {
                debug!(
                    path = %lock_path.display(),
                    wait_ms = start.elapsed().as_millis(),
                    "Upgrade lock acquired"
                );
                return Ok(Self {
                    _file: file,
                    lock_path,
                });
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(UpgradeError::UpgradeInProgress.into());
            }
            tokio::time::sleep(delay.min(remaining)).await;
        }

        Err(UpgradeError::UpgradeInProgress.into())
    }
}
