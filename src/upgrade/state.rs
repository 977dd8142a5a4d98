//! States of the upgrade and plugin flows.

use std::fmt;

/// Where a flow currently is.
///
/// ```text
/// Checking -> UpToDate
///          -> AwaitingSelection -> BackingUp -> AwaitingFinalConfirm -> Downloading
///             -> Installing -> ReconcilingConfig -> Reloading | AwaitingReboot -> Success
/// ```
///
/// `Aborted` is reachable from both confirmation states. `CheckFailed`,
/// `BackupFailed` and `DownloadFailed` end the flow before anything was
/// mutated. Failures while installing or reconciling the configuration go
/// through `RollingBack` to `RollbackOk` or `RollbackFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpgradeState {
    Checking,
    UpToDate,
    AwaitingSelection,
    AwaitingFinalConfirm,
    BackingUp,
    Downloading,
    Installing,
    ReconcilingConfig,
    Reloading,
    AwaitingReboot,
    Success,
    Aborted,
    CheckFailed,
    BackupFailed,
    DownloadFailed,
    RollingBack,
    RollbackOk,
    RollbackFailed,
    /// A plugin upgrade failed after confirmation. Nothing is rolled back.
    Failed,
}

impl UpgradeState {
    /// Whether the flow ends in this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::UpToDate
                | Self::Success
                | Self::Aborted
                | Self::CheckFailed
                | Self::BackupFailed
                | Self::DownloadFailed
                | Self::RollbackOk
                | Self::RollbackFailed
                | Self::Failed
        )
    }

    /// Whether this terminal state is a failure.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            Self::CheckFailed
                | Self::BackupFailed
                | Self::DownloadFailed
                | Self::RollbackOk
                | Self::RollbackFailed
                | Self::Failed
        )
    }

    /// Whether the flow waits for the operator in this state.
    #[must_use]
    pub const fn is_prompt(self) -> bool {
        matches!(self, Self::AwaitingSelection | Self::AwaitingFinalConfirm)
    }

    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Checking => "Checking for upgrades",
            Self::UpToDate => "No upgrades available",
            Self::AwaitingSelection => "Upgrade available",
            Self::AwaitingFinalConfirm => "Ready to upgrade",
            Self::BackingUp => "Backing up",
            Self::Downloading => "Downloading",
            Self::Installing => "Installing",
            Self::ReconcilingConfig => "Updating configuration",
            Self::Reloading => "Reloading extensions",
            Self::AwaitingReboot => "Restart required",
            Self::Success => "Upgrade complete",
            Self::Aborted => "Upgrade cancelled",
            Self::CheckFailed => "Could not check for upgrades",
            Self::BackupFailed => "Backup failed",
            Self::DownloadFailed => "Download failed",
            Self::RollingBack => "Rolling back",
            Self::RollbackOk => "Upgrade failed, rolled back",
            Self::RollbackFailed => "Rollback failed",
            Self::Failed => "Upgrade failed",
        }
    }
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}
