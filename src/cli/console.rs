//! Terminal implementations of the operator and host traits.
//!
//! The CLI runs outside the bot process, so [`ConsoleHost`] cannot hot-reload
//! extensions or manage custom emojis. It persists the reboot marker the bot
//! checks on startup and reports no loaded extensions, which turns the reload
//! step into a reminder to restart the bot.

use anyhow::{Result, bail};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, info};

use crate::constants::REBOOT_MARKER;
use crate::host::{
    BackupReport, ExtensionHost, Interaction, Operator, Session, View, actions,
};
use crate::manifest::emoji::CustomEmoji;
use crate::upgrade::UpgradeState;
use crate::utils::progress::Spinner;

/// The only session a terminal has.
pub const CONSOLE_SESSION: Session = Session {
    actor_id: 0,
    message_id: 0,
};

/// Map a typed answer to an interaction of [`CONSOLE_SESSION`].
///
/// Candidates are numbered from 1 on screen and from 0 in selections.
/// Anything unrecognized maps to an action without a decision.
#[must_use]
pub fn parse_answer(line: &str) -> Interaction {
    let answer = line.trim().to_ascii_lowercase();
    let (action, value) = match answer.as_str() {
        "y" | "yes" | "accept" => (actions::ACCEPT, None),
        "n" | "no" | "reject" | "q" => (actions::REJECT, None),
        other => match other.parse::<usize>() {
            Ok(number) if number > 0 => (actions::SELECTION, Some((number - 1).to_string())),
            _ => ("unknown", None),
        },
    };
    Interaction {
        actor_id: CONSOLE_SESSION.actor_id,
        message_id: CONSOLE_SESSION.message_id,
        action_id: action.to_string(),
        selected_value: value,
    }
}

/// Operator reading answers from stdin and rendering views to the terminal.
pub struct ConsoleOperator {
    lines: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
    spinner: Mutex<Option<Spinner>>,
    no_progress: bool,
}

impl ConsoleOperator {
    pub fn new(no_progress: bool) -> Self {
        Self {
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            spinner: Mutex::new(None),
            no_progress,
        }
    }

    fn progress(&self, message: &str) {
        let Ok(mut spinner) = self.spinner.lock() else { return };
        match spinner.as_ref() {
            Some(active) => active.set_message(message),
            None => {
                *spinner = Some(if self.no_progress {
                    Spinner::hidden(message)
                } else {
                    Spinner::new(message)
                });
            }
        }
    }

    fn stop_progress(&self) {
        if let Some(active) = self.spinner.lock().ok().and_then(|mut s| s.take()) {
            active.finish_and_clear();
        }
    }

    fn print_state(&self, state: UpgradeState) {
        if state.is_prompt() {
            self.stop_progress();
            return;
        }
        if !state.is_terminal() {
            self.progress(state.describe());
            return;
        }
        self.stop_progress();
        let line = match state {
            UpgradeState::Success => format!("✓ {}", state.describe()).green().bold(),
            UpgradeState::UpToDate | UpgradeState::Aborted | UpgradeState::RollbackOk => {
                state.describe().yellow()
            }
            _ => format!("✗ {}", state.describe()).red().bold(),
        };
        println!("{line}");
    }
}

impl Operator for ConsoleOperator {
    async fn render(&self, view: View) -> Result<()> {
        match view {
            View::Candidates {
                current,
                candidates,
                selected,
                reboot_required,
                release_notes,
            } => {
                println!("Installed: {} (release {})", current.version.bold(), current.release);
                for (index, candidate) in candidates.iter().enumerate() {
                    let marker = if index == selected { "›" } else { " " };
                    println!(
                        "{marker} {}. {} {} (release {})",
                        index + 1,
                        candidate.label(),
                        candidate.version.cyan(),
                        candidate.release
                    );
                }
                if reboot_required {
                    println!("{}", "This upgrade requires a reboot.".yellow());
                }
                if let Some(url) = release_notes {
                    println!("Release notes: {url}");
                }
                if candidates.len() > 1 {
                    println!("Upgrade? [y/N, or a number to select]");
                } else {
                    println!("Upgrade? [y/N]");
                }
            }
            View::FinalConfirm(backup) => {
                match backup {
                    BackupReport::Completed => println!("{}", "Backup complete.".green()),
                    BackupReport::Skipped => println!("{}", "Backup skipped.".yellow()),
                    BackupReport::FailedIgnored => {
                        println!("{}", "Backup failed, continuing without one.".red());
                    }
                }
                println!("Start the upgrade? [y/N]");
            }
            View::PluginConfirm(manifest) => {
                println!("Upgrade plugin {}?", manifest.id.bold());
                println!("  {} {}", manifest.name, manifest.version.cyan());
                if !manifest.description.is_empty() {
                    println!("  {}", manifest.description);
                }
                println!("[y/N]");
            }
            View::State(state) => self.print_state(state),
            View::Warning(message) => {
                self.stop_progress();
                eprintln!("{}: {message}", "warning".yellow().bold());
            }
        }
        Ok(())
    }

    async fn next_interaction(&self) -> Option<Interaction> {
        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(Some(line)) => Some(parse_answer(&line)),
            Ok(None) => None,
            Err(e) => {
                debug!("Could not read from stdin: {e}");
                None
            }
        }
    }
}

/// Host seen from outside the bot process.
#[derive(Debug, Clone)]
pub struct ConsoleHost {
    marker: PathBuf,
}

impl ConsoleHost {
    pub fn new(root: &Path) -> Self {
        Self {
            marker: root.join(REBOOT_MARKER),
        }
    }
}

impl ExtensionHost for ConsoleHost {
    fn loaded_extensions(&self) -> Vec<String> {
        Vec::new()
    }

    async fn reload_extension(&self, extension: &str) -> Result<()> {
        bail!("{extension} can only be reloaded by the running bot")
    }

    async fn run_shutdown_check(&self, plugin_id: &str) -> Result<()> {
        debug!("Shutdown check of {plugin_id} skipped, the bot is not attached");
        Ok(())
    }

    async fn flag_reboot(&self) -> Result<()> {
        tokio::fs::write(&self.marker, b"").await?;
        info!("Restart the bot to finish the upgrade");
        Ok(())
    }

    fn reboot_pending(&self) -> bool {
        self.marker.exists()
    }

    async fn refresh_emojis(&self) -> Result<()> {
        info!("Restart the bot to load the new emoji pack");
        Ok(())
    }

    async fn delete_custom_emoji(&self, id: u64) -> Result<()> {
        bail!("custom emoji {id} can only be deleted by the running bot")
    }

    async fn create_custom_emoji(&self, name: &str, _image: &Path) -> Result<CustomEmoji> {
        bail!("custom emoji {name} can only be uploaded by the running bot")
    }
}
