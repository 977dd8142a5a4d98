//! Tool settings.
//!
//! Settings live in `botup.toml` at the installation root. Every field has a
//! default, so a missing file or a partial file is valid:
//!
//! ```toml
//! branch = "main"
//! check_endpoint = "https://github.com/example/bot-releases.git"
//! files_endpoint = "https://github.com/example"
//! files_repository = "bot"
//! confirm_timeout_secs = 60
//!
//! [backup]
//! files = ["bot.py", "data.json", "config.toml"]
//! dirs = [{ path = "cogs" }, { path = "languages", extension = "json" }]
//!
//! [payload]
//! files = ["bot.py", "requirements.txt"]
//! dirs = [{ path = "cogs" }, { path = "utils" }]
//! ```

mod settings;

pub use settings::{BackupSettings, DirSpec, PayloadSettings, UpgradeSettings};

/// Settings file name at the installation root.
pub const SETTINGS_FILE: &str = "botup.toml";

/// Environment variable overriding the settings file location.
pub const SETTINGS_ENV: &str = "BOTUP_CONFIG";
