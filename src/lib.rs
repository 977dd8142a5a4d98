//! botup - self-update and plugin upgrades for chat bot installations
//!
//! A bot installation records its installed version in `plugins/system.json`.
//! A remote repository publishes `update.json` describing the head release and
//! legacy upgrade paths for older installations. botup decides which releases
//! apply, backs the installation up, installs the selected release with its new
//! dependencies, merges the operator's configuration into the new schema and
//! either reloads the bot's extensions or flags a reboot. Failures while
//! installing restore the backup.
//!
//! # Core Modules
//!
//! - [`resolver`] - which remote versions apply to the installed one
//! - [`merge`] - configuration merge into a new schema
//! - [`upgrade`] - the step-by-step upgrade state machine with rollback
//! - [`plugin`] - plugin-scoped upgrades, including emoji packs
//!
//! # Supporting Modules
//!
//! - [`manifest`] - typed records (`system.json`, `update.json`, plugin manifests, emoji packs)
//! - [`host`] - traits for everything outside the upgrade logic
//! - [`git`] - source fetching with the system `git` binary
//! - [`installer`] - dependency installation with pip
//! - [`layout`] - paths of an installation
//! - [`config`] - tool settings (`botup.toml`)
//! - [`core`] - error types and user-facing error display
//! - [`cli`] - command-line interface
//! - [`utils`] - file transfer and progress display
//!
//! # Installation Layout
//!
//! ```text
//! bot/
//! ├── botup.toml              # tool settings
//! ├── config.toml             # bot configuration, merged on upgrade
//! ├── plugins/
//! │   ├── system.json         # installed version record
//! │   └── <id>.json           # plugin registry records
//! ├── plugin_config/<id>.toml # plugin configuration
//! ├── emojis/
//! │   ├── current.json        # active emoji pack
//! │   └── <id>.json           # installed emoji packs
//! ├── cogs/ utils/            # extension and utility modules
//! └── old/                    # recovery directory
//!     ├── backup.json         # backup manifest with digests
//!     └── .upgrade.lock       # held while an upgrade runs
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod git;
pub mod host;
pub mod installer;
pub mod layout;
pub mod manifest;
pub mod merge;
pub mod plugin;
pub mod resolver;
pub mod upgrade;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
