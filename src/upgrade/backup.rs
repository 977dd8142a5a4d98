//! Recovery directory management.
//!
//! Before an upgrade mutates anything, the configured files and directories
//! are copied into `old/` under the installation root, mirroring their
//! relative paths. A backup manifest (`old/backup.json`) records every copied
//! file with its SHA-256 digest. Rollback copies each file back and verifies
//! that the restored content matches the recorded digest, so a successful
//! rollback is bit-for-bit.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info, warn};

use crate::config::BackupSettings;
use crate::constants::{MAX_BACKOFF_DELAY_MS, STARTING_BACKOFF_DELAY_MS};
use crate::host::FileTransfer;
use crate::layout::InstallLayout;
use crate::utils::fs::{file_digest, write_json};

/// Attempts per file when restoring.
const RESTORE_ATTEMPTS: usize = 3;

/// One backed-up file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Path relative to the installation root.
    pub path: PathBuf,
    /// Hex SHA-256 of the original content.
    pub sha256: String,
}

/// Contents of `old/backup.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub created_at: DateTime<Utc>,
    pub entries: Vec<BackupEntry>,
}

impl BackupManifest {
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| e.path == path)
    }
}

/// Creates and restores backups in the recovery directory.
pub struct BackupManager<'a, F> {
    files: &'a F,
    layout: &'a InstallLayout,
}

impl<'a, F: FileTransfer> BackupManager<'a, F> {
    pub const fn new(files: &'a F, layout: &'a InstallLayout) -> Self {
        Self {
            files,
            layout,
        }
    }

    /// Copy everything `settings` names into the recovery directory.
    ///
    /// Missing files and directories are skipped. Any copy failure aborts the
    /// backup.
    pub async fn create_backup(&self, settings: &BackupSettings) -> Result<BackupManifest> {
        let recovery = self.layout.recovery_dir();
        self.files.ensure_dir(&recovery).await?;
        info!("Creating backup in {}", recovery.display());

        let mut relative_paths: Vec<PathBuf> = settings.files.clone();
        for dir in &settings.dirs {
            let source = self.layout.join(&dir.path);
            if !self.files.exists(&source).await {
                debug!("Skipping missing directory {}", source.display());
                continue;
            }
            for file in self.files.list_files(&source).await? {
                if !dir.accepts(&file) {
                    continue;
                }
                let Some(name) = file.file_name() else { continue };
                let relative = dir.path.join(name);
                if !relative_paths.contains(&relative) {
                    relative_paths.push(relative);
                }
            }
        }

        let mut entries = Vec::with_capacity(relative_paths.len());
        for relative in relative_paths {
            let source = self.layout.join(&relative);
            if !self.files.exists(&source).await {
                debug!("Skipping missing file {}", source.display());
                continue;
            }
            debug!("Backing up: {}", source.display());
            let sha256 = file_digest(self.files, &source).await?;
            self.files
                .copy_file(&source, &recovery.join(&relative))
                .await
                .with_context(|| format!("Failed to back up {}", relative.display()))?;
            entries.push(BackupEntry {
                path: relative,
                sha256,
            });
        }

        let manifest = BackupManifest {
            created_at: Utc::now(),
            entries,
        };
        write_json(self.files, &self.layout.backup_manifest(), &manifest).await?;
        info!("Backup created: {} file(s)", manifest.entries.len());
        Ok(manifest)
    }

    /// Restore every file of `manifest` and verify its digest.
    ///
    /// Each file is retried with exponential backoff. The first file that
    /// cannot be restored or verified fails the whole rollback.
    pub async fn restore(&self, manifest: &BackupManifest) -> Result<usize> {
        warn!("Restoring {} file(s) from {}", manifest.entries.len(), self.layout.recovery_dir().display());

        for entry in &manifest.entries {
            let strategy = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
                .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS))
                .take(RESTORE_ATTEMPTS - 1);

            Retry::spawn(strategy, || self.restore_entry(entry))
                .await
                .with_context(|| format!("Failed to restore {}", entry.path.display()))?;
        }

        info!("Rollback restored {} file(s)", manifest.entries.len());
        Ok(manifest.entries.len())
    }

    /// Delete files an interrupted install created that did not exist before.
    pub async fn discard(&self, created: &[PathBuf]) -> Result<()> {
        for relative in created {
            debug!("Removing installed file: {}", relative.display());
            self.files
                .remove_file(&self.layout.join(relative))
                .await
                .with_context(|| format!("Failed to remove {}", relative.display()))?;
        }
        Ok(())
    }

    async fn restore_entry(&self, entry: &BackupEntry) -> Result<()> {
        let backup = self.layout.recovery_dir().join(&entry.path);
        let target = self.layout.join(&entry.path);
        debug!("Reverting: {}", target.display());

        self.files.copy_file(&backup, &target).await?;

        let restored = file_digest(self.files, &target).await?;
        if restored != entry.sha256 {
            bail!(
                "digest mismatch after restoring {}: expected {}, found {}",
                entry.path.display(),
                entry.sha256,
                restored
            );
        }
        Ok(())
    }
}
