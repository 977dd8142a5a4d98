//! Terminal spinner for long-running upgrade steps.
//!
//! Disabled (hidden) when `BOTUP_NO_PROGRESS` is set or stderr is not a
//! terminal, so scripted runs and tests get clean output.

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;

fn is_progress_disabled() -> bool {
    std::env::var("BOTUP_NO_PROGRESS").is_ok() || !std::io::stderr().is_terminal()
}

/// A spinner with consistent styling.
#[derive(Clone)]
pub struct Spinner {
    inner: IndicatifBar,
}

impl Spinner {
    /// Create and start a spinner showing `msg`.
    pub fn new(msg: impl Into<String>) -> Self {
        let bar = if is_progress_disabled() {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
                bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
            }
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        bar.set_message(msg.into());
        Self {
            inner: bar,
        }
    }

    /// A spinner that never draws, for `--no-progress`.
    pub fn hidden(msg: impl Into<String>) -> Self {
        let bar = IndicatifBar::hidden();
        bar.set_message(msg.into());
        Self {
            inner: bar,
        }
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        self.inner.set_message(msg.into());
    }

    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }

    /// Whether the spinner draws anything.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.inner.is_hidden()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spinner_lifecycle() {
        let spinner = Spinner::new("Checking for upgrades");
        spinner.set_message("Downloading");
        spinner.finish_and_clear();
    }

    #[test]
    fn test_hidden_spinner() {
        assert!(Spinner::hidden("Installing").is_hidden());
    }
}
