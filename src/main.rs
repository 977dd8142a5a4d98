//! botup CLI entry point
//!
//! Parses the command line, runs the command and renders failures with
//! suggestions:
//! - `upgrade` - upgrade the bot or a plugin
//! - `check` - list available upgrades

use anyhow::Result;
use botup::cli;
use botup::core::error::user_friendly_error;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Set up colored output for Windows
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}
