//! Global constants used throughout the botup codebase.
//!
//! File names of the persisted records, scratch directory names and the
//! timeouts shared by the upgrade and plugin flows live here so the layout of
//! an installation is discoverable in one place.

use std::time::Duration;

/// How long the operator has to answer a confirmation prompt (60 seconds).
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for acquiring the system-wide upgrade lock.
pub fn default_lock_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Maximum backoff delay for exponential backoff (500ms).
pub const MAX_BACKOFF_DELAY_MS: u64 = 500;

/// Starting delay for exponential backoff (10ms).
pub const STARTING_BACKOFF_DELAY_MS: u64 = 10;

/// Timeout for Git clone operations (120 seconds).
pub const GIT_CLONE_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for dependency installation (10 minutes).
pub const PACKAGE_INSTALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Plugin identifiers must match this pattern before anything is written.
pub const PLUGIN_ID_PATTERN: &str = "^[a-z0-9_-]*$";

/// Plugin id reserved for the main system record.
pub const SYSTEM_PLUGIN_ID: &str = "system";

/// Directory holding plugin registry records, relative to the install root.
pub const PLUGINS_DIR: &str = "plugins";

/// Directory holding plugin-scoped configuration documents.
pub const PLUGIN_CONFIG_DIR: &str = "plugin_config";

/// Directory holding emoji pack records.
pub const EMOJIS_DIR: &str = "emojis";

/// Directory extension modules are installed into.
pub const MODULES_DIR: &str = "cogs";

/// Directory utility modules are installed into.
pub const UTILS_DIR: &str = "utils";

/// File name of the current version record inside [`PLUGINS_DIR`].
pub const SYSTEM_RECORD: &str = "system.json";

/// Remote manifest file name at the root of the check checkout.
pub const REMOTE_MANIFEST: &str = "update.json";

/// Main configuration document.
pub const MAIN_CONFIG: &str = "config.toml";

/// Install channel marker written by the bootstrapper.
pub const INSTALL_CHANNEL_FILE: &str = ".install.json";

/// Requirements list used by the default channel.
pub const REQUIREMENTS: &str = "requirements.txt";

/// Requirements list used by the `stable` channel.
pub const REQUIREMENTS_STABLE: &str = "requirements_stable.txt";

/// Plugin manifest file name at the root of a plugin repository.
pub const PLUGIN_MANIFEST: &str = "plugin.json";

/// Emoji pack file name at the root of a plugin repository.
pub const PLUGIN_EMOJI_PACK: &str = "emoji.json";

/// Plugin-provided configuration template.
pub const PLUGIN_CONFIG_TEMPLATE: &str = "config.toml";

/// The active emoji pack record inside [`EMOJIS_DIR`].
pub const ACTIVE_EMOJI_PACK: &str = "current.json";

/// Scratch directory for the release check checkout.
pub const CHECK_SCRATCH: &str = "update_check";

/// Scratch directory for the downloaded release.
pub const UPDATE_SCRATCH: &str = "update";

/// Scratch directory for plugin checkouts.
pub const PLUGIN_SCRATCH: &str = "plugin_install";

/// Recovery directory backups are written to.
pub const RECOVERY_DIR: &str = "old";

/// Backup manifest written inside [`RECOVERY_DIR`].
pub const BACKUP_MANIFEST: &str = "backup.json";

/// Marker written when the host has to restart instead of hot-reloading.
pub const REBOOT_MARKER: &str = ".reboot-required";

/// Where to send operators when a rollback could not be completed.
pub const MANUAL_RECOVERY_HINT: &str = "Restore every file listed in old/backup.json back to its original location \
     by hand, then restart the bot before attempting another upgrade.";
