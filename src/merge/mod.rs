//! Configuration reconciliation between an installed document and a new schema.
//!
//! New releases ship a complete default `config.toml`. Installing it as is
//! would throw away everything the operator configured, so the installed
//! document is merged into the new one instead:
//!
//! 1. The old document is normalized to a flat key/value mapping. Tables are
//!    hoisted one level (older releases used a flat schema, newer ones group
//!    keys into sections), inner keys winning over top-level scalars.
//! 2. Every key of the new document that also exists in the flat mapping
//!    takes the operator's value. Everything else keeps the new default.
//! 3. Keys the new schema no longer has are dropped.
//!
//! When the old document cannot be read the new defaults are installed and
//! the skip is reported as [`MergeOutcome::Skipped`], never as an error.

use anyhow::{Context, Result};
use std::path::Path;
use toml::{Table, Value};
use tracing::{debug, warn};

use crate::core::UpgradeError;
use crate::host::FileTransfer;

/// A configuration document: a TOML table, either flat or sectioned.
pub type ConfigDocument = Table;

/// What [`ConfigMerger::reconcile_file`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The old document was merged into the new one.
    Merged,
    /// There was no old document; the new one was installed.
    Installed,
    /// The old document was unreadable; the new one was installed.
    Skipped {
        /// Display form of the [`UpgradeError::ConfigMergeSkipped`] behind the skip.
        reason: String,
    },
}

/// Structural merge of configuration documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigMerger;

impl ConfigMerger {
    /// Hoist the contents of every top-level table to the top level.
    ///
    /// Top-level scalars are applied first so a key found inside a section
    /// always wins over a scalar of the same name. Already flat documents come
    /// back unchanged.
    #[must_use]
    pub fn flatten(old: &ConfigDocument) -> ConfigDocument {
        let mut flat = Table::new();

        for (key, value) in old.iter().filter(|(_, v)| !v.is_table()) {
            flat.insert(key.clone(), value.clone());
        }
        for section in old.values().filter_map(Value::as_table) {
            for (key, value) in section {
                flat.insert(key.clone(), value.clone());
            }
        }

        flat
    }

    /// Re-apply the operator's values from `old` onto `new`.
    ///
    /// The result only ever contains keys that exist in `new`.
    #[must_use]
    pub fn merge(old: &ConfigDocument, new: &ConfigDocument) -> ConfigDocument {
        let flat = Self::flatten(old);
        let mut merged = new.clone();

        for (key, value) in merged.iter_mut() {
            match value {
                Value::Table(section) => {
                    for (inner_key, inner_value) in section.iter_mut() {
                        if let Some(old_value) = flat.get(inner_key) {
                            *inner_value = old_value.clone();
                        }
                    }
                }
                scalar => {
                    if let Some(old_value) = flat.get(key) {
                        *scalar = old_value.clone();
                    }
                }
            }
        }

        merged
    }

    /// Parse a document from TOML text.
    pub fn parse(text: &str) -> Result<ConfigDocument> {
        toml::from_str::<Table>(text).map_err(|e| UpgradeError::from(e).into())
    }

    /// Merge the document at `installed` with the new document at `incoming`
    /// and write the result to `installed`.
    ///
    /// A missing `installed` document is a fresh install of `incoming`. An
    /// unreadable one is skipped with a warning. Failure to read `incoming` or
    /// to write the result is an error.
    pub async fn reconcile_file(
        files: &impl FileTransfer,
        installed: &Path,
        incoming: &Path,
    ) -> Result<MergeOutcome> {
        let new_text = files
            .read_to_string(incoming)
            .await
            .with_context(|| format!("Failed to read new configuration {}", incoming.display()))?;
        let new = Self::parse(&new_text)
            .with_context(|| format!("Failed to parse new configuration {}", incoming.display()))?;

        if !files.exists(installed).await {
            debug!("Installing {}", installed.display());
            Self::write(files, installed, &new).await?;
            return Ok(MergeOutcome::Installed);
        }

        let old = match files.read_to_string(installed).await.and_then(|t| Self::parse(&t)) {
            Ok(old) => old,
            Err(e) => {
                let skipped = UpgradeError::ConfigMergeSkipped {
                    path: installed.display().to_string(),
                    reason: format!("{e:#}"),
                };
                warn!("{skipped}, installing defaults");
                Self::write(files, installed, &new).await?;
                return Ok(MergeOutcome::Skipped {
                    reason: skipped.to_string(),
                });
            }
        };

        debug!("Updating {}", installed.display());
        let merged = Self::merge(&old, &new);
        Self::write(files, installed, &merged).await?;
        Ok(MergeOutcome::Merged)
    }

    async fn write(files: &impl FileTransfer, path: &Path, document: &ConfigDocument) -> Result<()> {
        let content = toml::to_string_pretty(document).context("Failed to serialize configuration")?;
        files.write(path, content.as_bytes()).await
    }
}
