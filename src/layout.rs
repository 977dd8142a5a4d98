//! Paths of an installation.

use std::path::{Path, PathBuf};

use crate::constants::{
    ACTIVE_EMOJI_PACK, BACKUP_MANIFEST, CHECK_SCRATCH, EMOJIS_DIR, MAIN_CONFIG, MODULES_DIR,
    PLUGIN_CONFIG_DIR, PLUGIN_SCRATCH, PLUGINS_DIR, RECOVERY_DIR, REMOTE_MANIFEST, SYSTEM_RECORD,
    UPDATE_SCRATCH, UTILS_DIR,
};

/// Resolves every persisted file and scratch directory relative to the installation root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    #[must_use]
    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join(PLUGINS_DIR)
    }

    /// `plugins/system.json`
    #[must_use]
    pub fn system_record(&self) -> PathBuf {
        self.plugins_dir().join(SYSTEM_RECORD)
    }

    /// `plugins/<id>.json`
    #[must_use]
    pub fn plugin_record(&self, id: &str) -> PathBuf {
        self.plugins_dir().join(format!("{id}.json"))
    }

    /// `plugin_config/<id>.toml`
    #[must_use]
    pub fn plugin_config(&self, id: &str) -> PathBuf {
        self.root.join(PLUGIN_CONFIG_DIR).join(format!("{id}.toml"))
    }

    #[must_use]
    pub fn emojis_dir(&self) -> PathBuf {
        self.root.join(EMOJIS_DIR)
    }

    /// `emojis/<id>.json`
    #[must_use]
    pub fn emoji_pack(&self, id: &str) -> PathBuf {
        self.emojis_dir().join(format!("{id}.json"))
    }

    /// `emojis/current.json`
    #[must_use]
    pub fn active_emoji_pack(&self) -> PathBuf {
        self.emojis_dir().join(ACTIVE_EMOJI_PACK)
    }

    #[must_use]
    pub fn modules_dir(&self) -> PathBuf {
        self.root.join(MODULES_DIR)
    }

    #[must_use]
    pub fn utils_dir(&self) -> PathBuf {
        self.root.join(UTILS_DIR)
    }

    #[must_use]
    pub fn main_config(&self) -> PathBuf {
        self.root.join(MAIN_CONFIG)
    }

    /// Checkout of the check endpoint.
    #[must_use]
    pub fn check_scratch(&self) -> PathBuf {
        self.root.join(CHECK_SCRATCH)
    }

    /// `update.json` inside the check checkout.
    #[must_use]
    pub fn remote_manifest(&self) -> PathBuf {
        self.check_scratch().join(REMOTE_MANIFEST)
    }

    /// Checkout of the selected release.
    #[must_use]
    pub fn update_scratch(&self) -> PathBuf {
        self.root.join(UPDATE_SCRATCH)
    }

    /// `plugins/system.json` inside the release checkout.
    #[must_use]
    pub fn fetched_system_record(&self) -> PathBuf {
        self.update_scratch().join(PLUGINS_DIR).join(SYSTEM_RECORD)
    }

    #[must_use]
    pub fn plugin_scratch(&self) -> PathBuf {
        self.root.join(PLUGIN_SCRATCH)
    }

    #[must_use]
    pub fn recovery_dir(&self) -> PathBuf {
        self.root.join(RECOVERY_DIR)
    }

    #[must_use]
    pub fn backup_manifest(&self) -> PathBuf {
        self.recovery_dir().join(BACKUP_MANIFEST)
    }
}
