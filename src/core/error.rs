//! Error handling for botup
//!
//! This module provides the error taxonomy of the upgrade and plugin flows and
//! the user-friendly error reporting used by the CLI. The error system follows
//! two principles:
//! 1. **Strongly-typed errors** so the orchestrator can decide which failures
//!    are fatal, which trigger a rollback, and which are informational
//! 2. **User-friendly messages** with actionable suggestions for operators
//!
//! # Error Categories
//!
//! - **Before mutation**: [`UpgradeError::CheckFailed`], [`UpgradeError::BackupFailed`],
//!   [`UpgradeError::DownloadFailed`], [`UpgradeError::PluginNotFound`],
//!   [`UpgradeError::InvalidPluginManifest`] are reported and abandoned
//! - **After mutation**: [`UpgradeError::DependencyInstallFailed`] and
//!   [`UpgradeError::InstallFailed`] trigger a rollback
//! - **Manual recovery**: [`UpgradeError::RollbackFailed`] is the most severe
//!   outcome and always carries the recovery procedure
//! - **Informational**: [`UpgradeError::NoUpdateAvailable`] and
//!   [`UpgradeError::ConfigMergeSkipped`] are never fatal
//!
//! # Examples
//!
//! ```rust,no_run
//! use botup::core::{UpgradeError, user_friendly_error};
//!
//! let error = UpgradeError::PluginNotFound { id: "bridge".to_string() };
//! let ctx = user_friendly_error(anyhow::Error::from(error));
//! ctx.display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

use crate::constants::MANUAL_RECOVERY_HINT;

/// The main error type for botup operations.
///
/// Variants mirror the outcomes an upgrade can end in. Step functions usually
/// return `anyhow::Result` with context attached and the orchestrator wraps the
/// final failure into one of these variants when it classifies the outcome.
#[derive(Error, Debug)]
pub enum UpgradeError {
    /// The remote manifest or the current record could not be fetched or parsed.
    #[error("Update check failed: {reason}")]
    CheckFailed {
        /// Why the check failed
        reason: String,
    },

    /// Nothing newer than the installed release is available.
    #[error("No update available")]
    NoUpdateAvailable,

    /// Backing up local files failed and no override flag was given.
    #[error("Backup failed: {reason}")]
    BackupFailed {
        /// Why the backup failed
        reason: String,
    },

    /// The selected version could not be fetched or the fetched tree is incomplete.
    #[error("Download of '{reference}' failed: {reason}")]
    DownloadFailed {
        /// Branch or tag that was requested
        reference: String,
        /// Why the download failed
        reason: String,
    },

    /// The package installer exited unsuccessfully.
    #[error("Dependency installation failed ({status}): {packages}")]
    DependencyInstallFailed {
        /// Space separated list of packages that were requested
        packages: String,
        /// Exit status description reported by the installer
        status: String,
    },

    /// Copying the payload or rewriting records failed after mutation began.
    #[error("Install failed: {reason}")]
    InstallFailed {
        /// Why the install failed
        reason: String,
    },

    /// Restoring backed-up files failed. Manual recovery is required.
    #[error("Rollback failed: {reason}")]
    RollbackFailed {
        /// Why the rollback failed
        reason: String,
    },

    /// No registry record exists for the requested plugin.
    #[error("Plugin '{id}' is not installed")]
    PluginNotFound {
        /// Requested plugin id
        id: String,
    },

    /// The fetched plugin manifest is malformed or its id is invalid.
    #[error("Invalid plugin manifest: {reason}")]
    InvalidPluginManifest {
        /// What is wrong with the manifest
        reason: String,
    },

    /// The old configuration was unreadable, defaults were installed instead.
    #[error("Configuration merge skipped for {path}: {reason}")]
    ConfigMergeSkipped {
        /// Path of the configuration document
        path: String,
        /// Why the old document could not be used
        reason: String,
    },

    /// Another upgrade holds the system-wide lock.
    #[error("Another upgrade is already in progress")]
    UpgradeInProgress,

    /// A previous upgrade requires a restart before anything else is installed.
    #[error("A reboot is pending from a previous upgrade")]
    RebootPending,

    /// A git command returned a non-zero status.
    #[error("Git operation failed: {operation}")]
    GitCommandError {
        /// The git operation that failed
        operation: String,
        /// Standard error output of the command
        stderr: String,
    },

    /// Git executable not found in PATH.
    #[error("Git is not installed or not found in PATH")]
    GitNotFound,

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// Catch-all for messages without a dedicated variant
    #[error("{message}")]
    Other {
        /// Generic error message
        message: String,
    },
}

impl UpgradeError {
    /// Whether this failure happens after files were mutated and therefore
    /// needs the backed-up files restored.
    #[must_use]
    pub const fn requires_rollback(&self) -> bool {
        matches!(self, Self::DependencyInstallFailed { .. } | Self::InstallFailed { .. })
    }

    /// Whether this outcome is informational rather than a failure.
    #[must_use]
    pub const fn is_informational(&self) -> bool {
        matches!(self, Self::NoUpdateAvailable | Self::ConfigMergeSkipped { .. })
    }
}

impl Clone for UpgradeError {
    fn clone(&self) -> Self {
        match self {
            Self::CheckFailed {
                reason,
            } => Self::CheckFailed {
                reason: reason.clone(),
            },
            Self::NoUpdateAvailable => Self::NoUpdateAvailable,
            Self::BackupFailed {
                reason,
            } => Self::BackupFailed {
                reason: reason.clone(),
            },
            Self::DownloadFailed {
                reference,
                reason,
            } => Self::DownloadFailed {
                reference: reference.clone(),
                reason: reason.clone(),
            },
            Self::DependencyInstallFailed {
                packages,
                status,
            } => Self::DependencyInstallFailed {
                packages: packages.clone(),
                status: status.clone(),
            },
            Self::InstallFailed {
                reason,
            } => Self::InstallFailed {
                reason: reason.clone(),
            },
            Self::RollbackFailed {
                reason,
            } => Self::RollbackFailed {
                reason: reason.clone(),
            },
            Self::PluginNotFound {
                id,
            } => Self::PluginNotFound {
                id: id.clone(),
            },
            Self::InvalidPluginManifest {
                reason,
            } => Self::InvalidPluginManifest {
                reason: reason.clone(),
            },
            Self::ConfigMergeSkipped {
                path,
                reason,
            } => Self::ConfigMergeSkipped {
                path: path.clone(),
                reason: reason.clone(),
            },
            Self::UpgradeInProgress => Self::UpgradeInProgress,
            Self::RebootPending => Self::RebootPending,
            Self::GitCommandError {
                operation,
                stderr,
            } => Self::GitCommandError {
                operation: operation.clone(),
                stderr: stderr.clone(),
            },
            Self::GitNotFound => Self::GitNotFound,
            // For errors that don't implement Clone, convert to Other
            Self::IoError(e) => Self::Other {
                message: format!("IO error: {e}"),
            },
            Self::JsonError(e) => Self::Other {
                message: format!("JSON error: {e}"),
            },
            Self::TomlError(e) => Self::Other {
                message: format!("TOML parsing error: {e}"),
            },
            Self::TomlSerError(e) => Self::Other {
                message: format!("TOML serialization error: {e}"),
            },
            Self::Other {
                message,
            } => Self::Other {
                message: message.clone(),
            },
        }
    }
}

/// Error context wrapper that provides user-friendly error information.
///
/// Wraps an [`UpgradeError`] with an optional suggestion and optional details,
/// and knows how to print itself with terminal colors.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: UpgradeError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context without suggestion or details.
    #[must_use]
    pub const fn new(error: UpgradeError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with colors.
    ///
    /// Rollback failures are printed with a highlighted banner so they cannot
    /// be mistaken for an ordinary failed upgrade.
    pub fn display(&self) {
        if matches!(self.error, UpgradeError::RollbackFailed { .. }) {
            eprintln!("{}", "CRITICAL: manual recovery required".on_red().white().bold());
        }

        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with a suggestion where one is known.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(upgrade_error) = error.downcast_ref::<UpgradeError>() {
        return create_error_context(upgrade_error.clone());
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        if io_error.kind() == std::io::ErrorKind::PermissionDenied {
            return ErrorContext::new(UpgradeError::Other {
                message: format!("Permission denied: {io_error}"),
            })
            .with_suggestion("Check that the bot's install directory is writable by this user");
        }
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(UpgradeError::Other {
            message: format!("Invalid TOML: {toml_error}"),
        })
        .with_suggestion("Check the TOML syntax of botup.toml and config.toml");
    }

    ErrorContext::new(UpgradeError::Other {
        message: format!("{error:#}"),
    })
}

fn create_error_context(error: UpgradeError) -> ErrorContext {
    match &error {
        UpgradeError::CheckFailed {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Verify `check_endpoint` and `branch` in botup.toml and that git can reach them")
            .with_details("Nothing was changed on disk"),
        UpgradeError::BackupFailed {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Fix the backup problem, or rerun with `ignore-backup` to continue without one")
            .with_details("The upgrade was abandoned before any file was modified"),
        UpgradeError::DownloadFailed {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Check `files_endpoint` in botup.toml and your network connection")
            .with_details("No rollback was needed because nothing was installed"),
        UpgradeError::DependencyInstallFailed {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Check `python_binary` in botup.toml and install the packages manually"),
        UpgradeError::RollbackFailed {
            ..
        } => ErrorContext::new(error).with_suggestion(MANUAL_RECOVERY_HINT),
        UpgradeError::PluginNotFound {
            id,
        } => {
            let mut ctx = ErrorContext::new(error.clone())
                .with_suggestion("Run the command with an installed plugin id, or `system`");
            if matches!(id.as_str(), "force" | "ignore-backup" | "no-backup") {
                ctx = ctx.with_details(format!(
                    "'{id}' looks like a flag; pass the target first, e.g. `botup upgrade system {id}`"
                ));
            }
            ctx
        }
        UpgradeError::InvalidPluginManifest {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Plugin ids may only contain lowercase letters, digits, '_' and '-'"),
        UpgradeError::UpgradeInProgress => ErrorContext::new(error)
            .with_suggestion("Wait for the running upgrade to finish before starting another one"),
        UpgradeError::RebootPending => ErrorContext::new(error)
            .with_suggestion("Restart the bot to finish the previous upgrade"),
        UpgradeError::GitNotFound => ErrorContext::new(error)
            .with_suggestion("Install git and make sure it is on PATH"),
        _ => ErrorContext::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_classification() {
        assert!(
            UpgradeError::InstallFailed {
                reason: "copy".into()
            }
            .requires_rollback()
        );
        assert!(
            UpgradeError::DependencyInstallFailed {
                packages: "x".into(),
                status: "exit status: 1".into()
            }
            .requires_rollback()
        );
        assert!(
            !UpgradeError::DownloadFailed {
                reference: "v1".into(),
                reason: "missing".into()
            }
            .requires_rollback()
        );
        assert!(
            !UpgradeError::BackupFailed {
                reason: "disk".into()
            }
            .requires_rollback()
        );
    }

    #[test]
    fn test_informational_errors() {
        assert!(UpgradeError::NoUpdateAvailable.is_informational());
        assert!(
            UpgradeError::ConfigMergeSkipped {
                path: "config.toml".into(),
                reason: "unreadable".into()
            }
            .is_informational()
        );
        assert!(!UpgradeError::UpgradeInProgress.is_informational());
    }

    #[test]
    fn test_clone_converts_io_errors() {
        let error = UpgradeError::IoError(std::io::Error::other("boom"));
        match error.clone() {
            UpgradeError::Other {
                message,
            } => assert!(message.contains("boom")),
            other => panic!("unexpected clone: {other:?}"),
        }
    }

    #[test]
    fn test_rollback_failure_carries_recovery_hint() {
        let ctx = user_friendly_error(anyhow::Error::from(UpgradeError::RollbackFailed {
            reason: "disk full".into(),
        }));
        assert_eq!(ctx.suggestion.as_deref(), Some(MANUAL_RECOVERY_HINT));
        assert!(ctx.to_string().contains("disk full"));
    }

    #[test]
    fn test_plugin_not_found_flag_hint() {
        let ctx = user_friendly_error(anyhow::Error::from(UpgradeError::PluginNotFound {
            id: "force".into(),
        }));
        assert!(ctx.details.unwrap().contains("botup upgrade system force"));

        let ctx = user_friendly_error(anyhow::Error::from(UpgradeError::PluginNotFound {
            id: "bridge".into(),
        }));
        assert!(ctx.details.is_none());
    }

    #[test]
    fn test_unknown_error_keeps_chain() {
        let error = anyhow::anyhow!("inner").context("outer");
        let ctx = user_friendly_error(error);
        assert_eq!(ctx.error.to_string(), "outer: inner");
    }
}
