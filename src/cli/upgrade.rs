use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing::{debug, warn};

use super::CliConfig;
use super::console::{CONSOLE_SESSION, ConsoleHost, ConsoleOperator};
use crate::constants::SYSTEM_PLUGIN_ID;
use crate::core::UpgradeError;
use crate::git::GitSourceFetch;
use crate::host::Collaborators;
use crate::installer::PipInstaller;
use crate::plugin::PluginInstaller;
use crate::upgrade::{UpgradeFlags, UpgradeOrchestrator, UpgradeState};
use crate::utils::fs::LocalFileTransfer;

/// Upgrade the bot (`system`) or an installed plugin.
///
/// Flags are free-form words after the target and may be written with or
/// without leading dashes:
///
/// ```bash
/// botup upgrade
/// botup upgrade system force
/// botup upgrade force            # same as `upgrade system force`
/// botup upgrade bridge
/// ```
#[derive(Parser, Debug)]
pub struct UpgradeCommand {
    /// `system` (default) or a plugin id, followed by flags:
    /// force, no-backup, ignore-backup
    #[arg(value_name = "TARGET [FLAGS]", num_args = 0.., trailing_var_arg = true, allow_hyphen_values = true)]
    words: Vec<String>,
}

impl UpgradeCommand {
    /// Split the words into the target and its flags.
    ///
    /// A leading flag word means the target was omitted.
    fn target_and_flags(&self) -> (String, UpgradeFlags) {
        let (target, rest) = match self.words.split_first() {
            Some((first, rest)) if !UpgradeFlags::is_flag(first) => (first.clone(), rest),
            _ => (SYSTEM_PLUGIN_ID.to_string(), self.words.as_slice()),
        };
        let (flags, unknown) = UpgradeFlags::parse(rest);
        for word in unknown {
            warn!("Ignoring unknown flag: {word}");
        }
        (target, flags)
    }

    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let settings = config.load_settings().await?;
        let (target, flags) = self.target_and_flags();
        debug!(plugin = %target, ?flags, "Starting upgrade");

        let env = Collaborators {
            source: GitSourceFetch::new(),
            packages: PipInstaller::from_settings(&settings),
            files: LocalFileTransfer,
            host: ConsoleHost::new(&config.root),
            operator: ConsoleOperator::new(config.no_progress),
        };

        let (state, error) = if target == SYSTEM_PLUGIN_ID {
            let report = UpgradeOrchestrator::new(&env, &config.root, &settings).run(CONSOLE_SESSION, flags).await?;
            if report.state() == Some(UpgradeState::Success) && report.passed_through(UpgradeState::Reloading) {
                println!("Restart the bot or reload its extensions to run the new release.");
            }
            (report.state(), report.error)
        } else {
            if flags.no_backup || flags.ignore_backup {
                debug!("Plugin upgrades take no backup, ignoring backup flags");
            }
            let report = PluginInstaller::new(&env, &config.root, &settings)
                .run(CONSOLE_SESSION, &target, flags.force)
                .await?;
            if report.restart_suggested {
                println!("{}", "This plugin bridges to another platform, a restart may be required.".yellow());
            }
            (report.state(), report.error)
        };

        match (state, error) {
            (_, Some(error)) if error.is_informational() => {
                debug!("{error}");
                Ok(())
            }
            (Some(state), Some(error)) if state.is_failure() => Err(error.into()),
            (Some(state), None) if state.is_failure() => Err(UpgradeError::Other {
                message: state.describe().to_string(),
            }
            .into()),
            _ => Ok(()),
        }
    }
}
