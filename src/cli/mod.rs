//! Command-line interface for botup.
//!
//! # Commands
//!
//! - `upgrade [TARGET] [FLAGS...]` - upgrade the bot (`system`, the default) or a plugin
//! - `check` - list available upgrades without installing anything
//!
//! # Global Options
//!
//! - `--verbose` / `-v` - debug logging
//! - `--quiet` / `-q` - no logging
//! - `--config` / `-c` - settings file (default `<root>/botup.toml`, env `BOTUP_CONFIG`)
//! - `--root` - installation root (default `.`, env `BOTUP_ROOT`)
//! - `--no-progress` - disable spinners
//!
//! `RUST_LOG` takes precedence over `--verbose` and `--quiet`.
//!
//! ```bash
//! botup check
//! botup upgrade
//! botup upgrade system force no-backup
//! botup upgrade bridge
//! ```

mod check;
pub mod console;
mod upgrade;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::{SETTINGS_ENV, SETTINGS_FILE, UpgradeSettings};

/// Options shared by every command, resolved from the global flags.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter (`debug`, `info`), `None` disables logging.
    pub log_level: Option<String>,
    pub no_progress: bool,
    pub root: PathBuf,
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    /// Install the global tracing subscriber.
    ///
    /// `RUST_LOG` wins over the configured level. Logs go to stderr so they
    /// never interleave with command output.
    pub fn init_logging(&self) {
        let filter = match std::env::var("RUST_LOG") {
            Ok(_) => EnvFilter::from_default_env(),
            Err(_) => EnvFilter::new(self.log_level.as_deref().unwrap_or("off")),
        };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    /// Settings from `--config`, or `botup.toml` in the installation root.
    pub async fn load_settings(&self) -> Result<UpgradeSettings> {
        let path = self.config_path.clone().unwrap_or_else(|| self.root.join(SETTINGS_FILE));
        debug!("Loading settings from {}", path.display());
        UpgradeSettings::load_or_default(&path).await
    }
}

/// Self-update and plugin upgrade tool for chat bot installations.
#[derive(Parser)]
#[command(
    name = "botup",
    about = "Upgrade a bot installation and its plugins",
    version,
    long_about = "botup checks a release repository for newer versions of a bot, backs up the \
                  installation, installs the new release with its dependencies, merges the \
                  configuration and rolls back when anything goes wrong."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable logging
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Settings file
    #[arg(short, long, global = true, env = SETTINGS_ENV)]
    config: Option<PathBuf>,

    /// Installation root of the bot
    #[arg(long, global = true, env = "BOTUP_ROOT", default_value = ".")]
    root: PathBuf,

    /// Disable progress spinners
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Upgrade the bot or one of its plugins
    Upgrade(upgrade::UpgradeCommand),

    /// Show available upgrades without installing them
    Check(check::CheckCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        config.init_logging();
        self.execute_with_config(config).await
    }

    /// Translate the global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("info".to_string())
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress,
            root: self.root.clone(),
            config_path: self.config.clone(),
        }
    }

    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        match self.command {
            Commands::Upgrade(cmd) => cmd.execute(&config).await,
            Commands::Check(cmd) => cmd.execute(&config).await,
        }
    }
}
