//! Requirement lists and the install channel.

use anyhow::Result;
use std::path::Path;
use tracing::{debug, warn};

use crate::constants::{INSTALL_CHANNEL_FILE, REQUIREMENTS, REQUIREMENTS_STABLE};
use crate::host::FileTransfer;

/// Which requirement list an installation tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallChannel {
    #[default]
    Default,
    Stable,
}

impl InstallChannel {
    /// Requirement list file name for this channel.
    #[must_use]
    pub const fn requirements_file(self) -> &'static str {
        match self {
            Self::Default => REQUIREMENTS,
            Self::Stable => REQUIREMENTS_STABLE,
        }
    }

    /// Read `.install.json` under `root`.
    ///
    /// The file holds a JSON string; `"stable"` selects the stable list and
    /// anything else (including a missing or unreadable file) the default one.
    pub async fn detect(files: &impl FileTransfer, root: &Path) -> Self {
        let path = root.join(INSTALL_CHANNEL_FILE);
        match files.read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(value) if value.as_str() == Some("stable") => Self::Stable,
                Ok(_) => Self::Default,
                Err(e) => {
                    warn!("Ignoring unreadable {}: {e}", path.display());
                    Self::Default
                }
            },
            Err(_) => {
                debug!("{} not found, using the default channel", path.display());
                Self::Default
            }
        }
    }
}

/// Parse a requirement list: one entry per line, blank lines and comments skipped.
#[must_use]
pub fn parse_requirements(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Entries of `new` that are not in `old`, in `new` order.
#[must_use]
pub fn requirements_delta(old: &[String], new: &[String]) -> Vec<String> {
    new.iter().filter(|entry| !old.contains(entry)).cloned().collect()
}

/// Read a requirement list; `None` when the file is missing or unreadable.
pub async fn read_requirements(files: &impl FileTransfer, path: &Path) -> Result<Option<Vec<String>>> {
    if !files.exists(path).await {
        return Ok(None);
    }
    let text = files.read_to_string(path).await?;
    Ok(Some(parse_requirements(&text)))
}
