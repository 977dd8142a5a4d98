//! Self-upgrade of a bot installation.
//!
//! # Flow
//!
//! ```text
//! 1. Check
//!    ├── Clone the configured branch of the check endpoint
//!    ├── Read plugins/system.json and update.json
//!    └── Resolve candidates (head release, legacy ranges)
//!
//! 2. Selection (operator picks a candidate, accepts or rejects)
//!
//! 3. Backup into old/ (unless `no-backup`), then final confirmation
//!
//! 4. Download
//!    └── Shallow clone of the selected tag, must contain plugins/system.json
//!
//! 5. Install
//!    ├── Install new dependencies only
//!    ├── Copy the configured payload
//!    ├── Rewrite plugins/system.json
//!    └── Merge config.toml
//!
//! 6. Flag a reboot or reload every loaded extension
//! ```
//!
//! Failures before step 5 leave the installation untouched. Failures during
//! step 5 restore the backup; if that fails too the flow ends in
//! [`UpgradeState::RollbackFailed`] and the operator has to recover by hand.
//!
//! # Flags
//!
//! Flags are free-form words after the target:
//!
//! - `force` - offer candidates even when nothing newer is available
//! - `no-backup` - skip the backup step
//! - `ignore-backup` - continue when the backup step fails

pub mod backup;
pub mod lock;
pub mod orchestrator;
pub mod prompt;
pub mod state;

#[cfg(test)]
mod tests;

pub use backup::{BackupManager, BackupManifest};
pub use lock::UpgradeLock;
pub use orchestrator::{CheckResult, UpgradeOrchestrator};
pub use state::UpgradeState;

use crate::core::UpgradeError;
use crate::host::BackupReport;
use crate::manifest::ReleaseDescriptor;
use crate::merge::MergeOutcome;

/// Flags accepted by the upgrade command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradeFlags {
    pub force: bool,
    pub no_backup: bool,
    pub ignore_backup: bool,
}

impl UpgradeFlags {
    /// Parse free-form flag words. Returns the flags and the words that were not recognized.
    pub fn parse<I, S>(words: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut flags = Self::default();
        let mut unknown = Vec::new();
        for word in words {
            match word.as_ref().trim_start_matches('-') {
                "force" => flags.force = true,
                "no-backup" => flags.no_backup = true,
                "ignore-backup" => flags.ignore_backup = true,
                other => unknown.push(other.to_string()),
            }
        }
        (flags, unknown)
    }

    /// Whether `word` is one of the flag words.
    #[must_use]
    pub fn is_flag(word: &str) -> bool {
        matches!(word.trim_start_matches('-'), "force" | "no-backup" | "ignore-backup")
    }
}

/// How a flow ended.
#[derive(Debug, Clone, Default)]
pub struct UpgradeReport {
    /// Every state the flow passed through, the last one is terminal.
    pub transitions: Vec<UpgradeState>,
    /// The candidate the operator accepted.
    pub selected: Option<ReleaseDescriptor>,
    pub backup: Option<BackupReport>,
    pub config: Option<MergeOutcome>,
    /// Non-fatal problems, such as extensions that failed to reload.
    pub warnings: Vec<String>,
    /// Why the flow failed.
    pub error: Option<UpgradeError>,
}

impl UpgradeReport {
    /// The terminal state.
    #[must_use]
    pub fn state(&self) -> Option<UpgradeState> {
        self.transitions.last().copied()
    }

    #[must_use]
    pub fn passed_through(&self, state: UpgradeState) -> bool {
        self.transitions.contains(&state)
    }
}

#[cfg(test)]
mod flag_tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let (flags, unknown) = UpgradeFlags::parse(["force", "--no-backup", "verbose"]);
        assert!(flags.force);
        assert!(flags.no_backup);
        assert!(!flags.ignore_backup);
        assert_eq!(unknown, vec!["verbose".to_string()]);
    }

    #[test]
    fn test_is_flag() {
        assert!(UpgradeFlags::is_flag("ignore-backup"));
        assert!(!UpgradeFlags::is_flag("bridge"));
    }
}
