use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use super::CliConfig;
use super::console::{ConsoleHost, ConsoleOperator};
use crate::git::GitSourceFetch;
use crate::host::Collaborators;
use crate::installer::PipInstaller;
use crate::upgrade::UpgradeOrchestrator;
use crate::utils::fs::LocalFileTransfer;
use crate::utils::progress::Spinner;

/// List the upgrades the remote offers for this installation.
#[derive(Parser, Debug)]
pub struct CheckCommand {
    /// List candidates that are not newer than the installed release
    #[arg(long)]
    force: bool,
}

impl CheckCommand {
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let settings = config.load_settings().await?;
        let env = Collaborators {
            source: GitSourceFetch::new(),
            packages: PipInstaller::from_settings(&settings),
            files: LocalFileTransfer,
            host: ConsoleHost::new(&config.root),
            operator: ConsoleOperator::new(config.no_progress),
        };
        let orchestrator = UpgradeOrchestrator::new(&env, &config.root, &settings);

        let spinner = if config.no_progress {
            Spinner::hidden("Checking for upgrades")
        } else {
            Spinner::new("Checking for upgrades")
        };
        let check = orchestrator.check(self.force).await;
        spinner.finish_and_clear();
        let check = check?;

        println!("Installed: {} (release {})", check.current.version.bold(), check.current.release);
        if check.candidates.is_empty() {
            println!("{}", "Up to date.".green());
            return Ok(());
        }
        for (index, candidate) in check.candidates.iter().enumerate() {
            let reboot = if candidate.requires_reboot(&check.current) {
                " (reboot required)".yellow().to_string()
            } else {
                String::new()
            };
            println!(
                "  {}. {} {} (release {}){reboot}",
                index + 1,
                candidate.label(),
                candidate.version.cyan(),
                candidate.release
            );
        }
        Ok(())
    }
}
