//! Typed records persisted by an installation or published by a remote.
//!
//! Every JSON document the upgrade and plugin flows read is parsed into one of
//! the schemas below and validated on read, so a malformed document is rejected
//! with a typed error before any decision is made on it:
//!
//! - [`CurrentState`] - `plugins/system.json`, the installed version record
//! - [`RemoteManifest`] / [`LegacyRange`] - `update.json` published by the remote
//! - [`ReleaseDescriptor`] - a resolved upgrade candidate
//! - [`PluginManifest`](plugin::PluginManifest) - plugin registry records
//! - [`EmojiPack`](emoji::EmojiPack) - custom emoji bundles shipped by plugins

pub mod emoji;
pub mod plugin;

pub use emoji::{EmojiEntry, EmojiPack};
pub use plugin::{PluginManifest, validate_plugin_id};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::host::FileTransfer;
use crate::utils::fs::{read_json, write_json};

/// Locally installed version record (`plugins/system.json`).
///
/// The record is treated as a value: transitions such as
/// [`after_install`](Self::after_install) return a new record and the caller
/// persists it with [`save`](Self::save). Fields this tool does not know about
/// are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentState {
    /// Human readable version, e.g. `v3.2.0`.
    pub version: String,
    /// Monotonic release counter.
    pub release: i64,
    /// Legacy release counter, present once a legacy upgrade path was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy: Option<i64>,
    /// Everything else in the record.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CurrentState {
    /// Create a record with no legacy counter and no extra fields.
    pub fn new(version: impl Into<String>, release: i64) -> Self {
        Self {
            version: version.into(),
            release,
            legacy: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Legacy counter with "absent" mapped to -1.
    #[must_use]
    pub fn legacy_or_default(&self) -> i64 {
        self.legacy.unwrap_or(-1)
    }

    /// Compute the record to persist after `descriptor` was installed.
    ///
    /// A legacy upgrade does not change the codebase, so only `version` and
    /// `legacy` are rewritten. A head upgrade adopts the fetched record but
    /// never lets the release counter go backwards.
    #[must_use]
    pub fn after_install(&self, descriptor: &ReleaseDescriptor, fetched: Option<&Self>) -> Self {
        if descriptor.is_legacy() {
            let mut next = self.clone();
            next.version.clone_from(&descriptor.version);
            next.legacy = Some(descriptor.release);
            return next;
        }

        let mut next = fetched.cloned().unwrap_or_else(|| {
            let mut next = self.clone();
            next.version.clone_from(&descriptor.version);
            next.release = descriptor.release;
            next
        });
        next.release = next.release.max(self.release);
        next
    }

    /// Read and validate the record at `path`.
    pub async fn load(files: &impl FileTransfer, path: &Path) -> Result<Self> {
        read_json(files, path).await
    }

    /// Persist the record at `path`.
    pub async fn save(&self, files: &impl FileTransfer, path: &Path) -> Result<()> {
        write_json(files, path, self).await
    }
}

/// A remote-declared compatibility window for older installations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyRange {
    /// Lowest installed release this path applies to (inclusive).
    pub lower: i64,
    /// Highest installed release this path applies to (inclusive).
    pub upper: i64,
    /// Legacy release counter installed by this path.
    pub release: i64,
    /// Version tag to fetch.
    pub version: String,
    /// Reboot threshold compared against the installed legacy counter.
    pub reboot: i64,
}

impl LegacyRange {
    /// Whether an installation at `release` falls inside this window.
    #[must_use]
    pub const fn covers(&self, release: i64) -> bool {
        self.lower <= release && release <= self.upper
    }
}

/// The remote manifest (`update.json`) found in the check checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteManifest {
    /// Head release version tag.
    pub version: String,
    /// Head release counter.
    pub release: i64,
    /// Reboot threshold of the head release.
    pub reboot: i64,
    /// Legacy upgrade paths in publication order.
    #[serde(default)]
    pub legacy: Vec<LegacyRange>,
}

impl RemoteManifest {
    /// Read and validate the manifest at `path`.
    pub async fn load(files: &impl FileTransfer, path: &Path) -> Result<Self> {
        read_json(files, path).await
    }
}

/// An upgrade candidate produced by [`VersionResolver`](crate::resolver::VersionResolver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    /// Version tag to fetch.
    pub version: String,
    /// Release counter the candidate installs (head or legacy counter).
    pub release: i64,
    /// Position of the originating legacy range, `None` for the head release.
    pub legacy_index: Option<usize>,
    /// Reboot threshold.
    pub reboot: i64,
}

impl ReleaseDescriptor {
    /// Whether this candidate comes from a legacy range.
    #[must_use]
    pub const fn is_legacy(&self) -> bool {
        self.legacy_index.is_some()
    }

    /// Whether installing this candidate on top of `current` needs a restart.
    ///
    /// Legacy candidates compare against the installed legacy counter (absent
    /// is -1), head candidates against the installed release. A restart is
    /// needed when the threshold is at least that baseline.
    #[must_use]
    pub fn requires_reboot(&self, current: &CurrentState) -> bool {
        let baseline = if self.is_legacy() {
            current.legacy_or_default()
        } else {
            current.release
        };
        self.reboot >= baseline
    }

    /// Short label shown next to the version in selection lists.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        if self.is_legacy() { "Legacy version" } else { "Release version" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn head(release: i64, reboot: i64) -> ReleaseDescriptor {
        ReleaseDescriptor {
            version: format!("v{release}"),
            release,
            legacy_index: None,
            reboot,
        }
    }

    fn legacy(release: i64, reboot: i64) -> ReleaseDescriptor {
        ReleaseDescriptor {
            version: format!("v{release}-legacy"),
            release,
            legacy_index: Some(0),
            reboot,
        }
    }

    #[test]
    fn test_current_state_preserves_unknown_fields() {
        let raw = json!({
            "id": "system",
            "version": "v2.0.0",
            "release": 20,
            "modules": ["bridge.py"],
            "shutdown": false
        });
        let state: CurrentState = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(state.release, 20);
        assert_eq!(state.legacy, None);
        assert_eq!(serde_json::to_value(&state).unwrap(), raw);
    }

    #[test]
    fn test_current_state_rejects_missing_release() {
        let raw = json!({"version": "v1"});
        assert!(serde_json::from_value::<CurrentState>(raw).is_err());
    }

    #[test]
    fn test_legacy_transition_only_rewrites_version_and_counter() {
        let mut current = CurrentState::new("v1.0.0", 10);
        current.extra.insert("id".into(), json!("system"));

        let next = current.after_install(&legacy(11, 0), None);
        assert_eq!(next.version, "v11-legacy");
        assert_eq!(next.legacy, Some(11));
        assert_eq!(next.release, 10);
        assert_eq!(next.extra.get("id"), Some(&json!("system")));
        // The original record is untouched.
        assert_eq!(current.legacy, None);
    }

    #[test]
    fn test_head_transition_never_decreases_release() {
        let current = CurrentState::new("v1.0.0", 10);
        let fetched = CurrentState::new("v0.9.0", 9);

        let next = current.after_install(&head(9, 0), Some(&fetched));
        assert_eq!(next.version, "v0.9.0");
        assert_eq!(next.release, 10);

        let fetched = CurrentState::new("v1.2.0", 12);
        let next = current.after_install(&head(12, 0), Some(&fetched));
        assert_eq!(next.release, 12);
    }

    #[test]
    fn test_reboot_baselines() {
        let mut current = CurrentState::new("v1", 10);
        assert!(head(12, 10).requires_reboot(&current));
        assert!(!head(12, 9).requires_reboot(&current));

        // Absent legacy counter counts as -1.
        assert!(legacy(11, -1).requires_reboot(&current));
        current.legacy = Some(3);
        assert!(!legacy(11, 2).requires_reboot(&current));
        assert!(legacy(11, 3).requires_reboot(&current));
    }

    #[test]
    fn test_legacy_range_bounds_are_inclusive() {
        let range = LegacyRange {
            lower: 5,
            upper: 10,
            release: 11,
            version: "v1.1-legacy".into(),
            reboot: 0,
        };
        assert!(range.covers(5));
        assert!(range.covers(10));
        assert!(!range.covers(4));
        assert!(!range.covers(11));
    }

    #[test]
    fn test_remote_manifest_legacy_defaults_to_empty() {
        let manifest: RemoteManifest =
            serde_json::from_value(json!({"version": "v3", "release": 30, "reboot": 0})).unwrap();
        assert!(manifest.legacy.is_empty());
    }
}
