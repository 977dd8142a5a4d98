//! Narrow interfaces to everything outside the upgrade logic.
//!
//! The orchestrator never shells out or touches the chat platform directly.
//! Each external concern is a trait with typed outcomes:
//!
//! - [`SourceFetch`] - check out a branch or tag of a remote repository
//! - [`PackageInstaller`] - install a list of named dependencies
//! - [`FileTransfer`] - copy, list, read and write files
//! - [`ExtensionHost`] - the running bot: extension reload, reboot flag, custom emojis
//! - [`Operator`] - the person driving the upgrade through the chat UI
//!
//! Production implementations live in [`crate::git`], [`crate::installer`],
//! [`crate::utils::fs`] and [`crate::cli::console`]; fakes for tests live in
//! `test_utils`.

use anyhow::Result;
use std::future::Future;
use std::path::{Path, PathBuf};

use crate::manifest::emoji::CustomEmoji;
use crate::manifest::{CurrentState, PluginManifest, ReleaseDescriptor};
use crate::upgrade::state::UpgradeState;

/// Fetches a reference of a remote repository into a local directory.
pub trait SourceFetch: Send + Sync {
    /// Check out `reference` (or the default branch) of `url` into `dest`.
    ///
    /// `dest` must not exist. Fails loudly when the reference or URL is invalid.
    fn fetch(
        &self,
        url: &str,
        reference: Option<&str>,
        dest: &Path,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Options for [`PackageInstaller::install`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Install only the named packages, not their dependencies.
    pub no_dependencies: bool,
}

/// Result of running the package installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStatus {
    Success,
    /// The installer ran and reported failure.
    Failed {
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Tail of the installer's error output
        stderr: String,
    },
}

/// Installs named dependencies.
pub trait PackageInstaller: Send + Sync {
    fn install(
        &self,
        packages: &[String],
        options: InstallOptions,
    ) -> impl Future<Output = Result<InstallStatus>> + Send;
}

/// File operations used by every flow.
pub trait FileTransfer: Send + Sync {
    /// Copy `src` over `dst`, creating parent directories.
    fn copy_file(&self, src: &Path, dst: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Regular files directly inside `dir`, sorted. A missing directory is an error.
    fn list_files(&self, dir: &Path) -> impl Future<Output = Result<Vec<PathBuf>>> + Send;

    fn read(&self, path: &Path) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Write `contents` to `path`, creating parent directories.
    fn write(&self, path: &Path, contents: &[u8]) -> impl Future<Output = Result<()>> + Send;

    fn ensure_dir(&self, path: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Remove a file. A missing file is not an error.
    fn remove_file(&self, path: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Remove a directory tree. A missing directory is not an error.
    fn remove_dir_all(&self, path: &Path) -> impl Future<Output = Result<()>> + Send;

    fn exists(&self, path: &Path) -> impl Future<Output = bool> + Send;

    fn read_to_string(&self, path: &Path) -> impl Future<Output = Result<String>> + Send {
        async move {
            let bytes = self.read(path).await?;
            String::from_utf8(bytes)
                .map_err(|e| anyhow::anyhow!("{} is not valid UTF-8: {e}", path.display()))
        }
    }
}

/// The running bot process.
pub trait ExtensionHost: Send + Sync {
    /// Dotted names (`cogs.bridge`) of the currently loaded extensions.
    fn loaded_extensions(&self) -> Vec<String>;

    fn reload_extension(&self, extension: &str) -> impl Future<Output = Result<()>> + Send;

    /// Run a plugin's pre-unload shutdown check.
    fn run_shutdown_check(&self, plugin_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Persist the marker telling the host to restart instead of hot-reloading.
    fn flag_reboot(&self) -> impl Future<Output = Result<()>> + Send;

    /// Whether a reboot is pending from an earlier upgrade.
    fn reboot_pending(&self) -> bool;

    /// Reload the UI emoji set after the active pack changed.
    fn refresh_emojis(&self) -> impl Future<Output = Result<()>> + Send;

    fn delete_custom_emoji(&self, id: u64) -> impl Future<Output = Result<()>> + Send;

    fn create_custom_emoji(
        &self,
        name: &str,
        image: &Path,
    ) -> impl Future<Output = Result<CustomEmoji>> + Send;
}

/// Identifies the operator and the message an interactive flow is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub actor_id: u64,
    pub message_id: u64,
}

/// An interaction event delivered by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub actor_id: u64,
    pub message_id: u64,
    /// Custom action identifier of the pressed component.
    pub action_id: String,
    /// Selected value for select menus.
    pub selected_value: Option<String>,
}

/// Action identifiers used by the prompts.
pub mod actions {
    pub const ACCEPT: &str = "accept";
    pub const REJECT: &str = "reject";
    pub const SELECTION: &str = "selection";
}

/// What an interaction asks the flow to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
    Select(usize),
}

impl Interaction {
    /// Whether the event belongs to `session`.
    #[must_use]
    pub fn belongs_to(&self, session: &Session) -> bool {
        self.actor_id == session.actor_id && self.message_id == session.message_id
    }

    /// Interpret the event. Unknown actions and unparsable selections yield `None`.
    #[must_use]
    pub fn decision(&self) -> Option<Decision> {
        match self.action_id.as_str() {
            actions::ACCEPT => Some(Decision::Accept),
            actions::REJECT => Some(Decision::Reject),
            actions::SELECTION => {
                self.selected_value.as_deref()?.parse().ok().map(Decision::Select)
            }
            _ => None,
        }
    }
}

/// How the backup step ended, shown at the final confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupReport {
    Completed,
    Skipped,
    FailedIgnored,
}

/// Something the operator is shown.
#[derive(Debug, Clone, PartialEq)]
pub enum View {
    /// Candidate list with the selected entry and its reboot requirement.
    Candidates {
        current: CurrentState,
        candidates: Vec<ReleaseDescriptor>,
        selected: usize,
        reboot_required: bool,
        release_notes: Option<String>,
    },
    /// Final go/no-go after the backup step.
    FinalConfirm(BackupReport),
    /// A plugin upgrade waiting for confirmation.
    PluginConfirm(PluginManifest),
    /// Progress or terminal state of a flow.
    State(UpgradeState),
    /// A non-fatal problem worth showing, e.g. a module that failed to reload.
    Warning(String),
}

/// The operator driving an interactive flow.
pub trait Operator: Send + Sync {
    fn render(&self, view: View) -> impl Future<Output = Result<()>> + Send;

    /// Next interaction from any actor on any message, `None` when the stream ended.
    fn next_interaction(&self) -> impl Future<Output = Option<Interaction>> + Send;
}

/// Every collaborator a flow needs, bundled.
pub struct Collaborators<S, P, F, H, O> {
    pub source: S,
    pub packages: P,
    pub files: F,
    pub host: H,
    pub operator: O,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(action: &str, value: Option<&str>) -> Interaction {
        Interaction {
            actor_id: 1,
            message_id: 2,
            action_id: action.to_string(),
            selected_value: value.map(str::to_string),
        }
    }

    #[test]
    fn test_decisions() {
        assert_eq!(event("accept", None).decision(), Some(Decision::Accept));
        assert_eq!(event("reject", None).decision(), Some(Decision::Reject));
        assert_eq!(event("selection", Some("2")).decision(), Some(Decision::Select(2)));
        assert_eq!(event("selection", Some("x")).decision(), None);
        assert_eq!(event("selection", None).decision(), None);
        assert_eq!(event("moreinfo", None).decision(), None);
    }

    #[test]
    fn test_session_filter() {
        let session = Session {
            actor_id: 1,
            message_id: 2,
        };
        assert!(event("accept", None).belongs_to(&session));

        let mut other = event("accept", None);
        other.actor_id = 9;
        assert!(!other.belongs_to(&session));

        let mut other = event("accept", None);
        other.message_id = 9;
        assert!(!other.belongs_to(&session));
    }
}
