//! Source fetching through the system `git` binary.
//!
//! Only clones are needed: the check step clones a branch of the check
//! endpoint, the download step shallow-clones one tag of the release
//! repository, and the plugin flow clones a plugin's recorded repository.

pub mod command_builder;

use anyhow::{Context, Result};
use std::path::Path;

use crate::constants::GIT_CLONE_TIMEOUT;
use crate::host::SourceFetch;
use command_builder::GitCommand;

/// [`SourceFetch`] implemented with `git clone`.
#[derive(Debug, Clone, Copy)]
pub struct GitSourceFetch {
    /// Use `--single-branch --depth 1` when a reference is given.
    shallow: bool,
}

impl Default for GitSourceFetch {
    fn default() -> Self {
        Self {
            shallow: true,
        }
    }
}

impl GitSourceFetch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep full history when cloning a reference.
    #[must_use]
    pub const fn full_history(mut self) -> Self {
        self.shallow = false;
        self
    }

    /// Build the clone command for `url` at `reference` into `dest`.
    pub fn command(&self, url: &str, reference: Option<&str>, dest: &Path) -> GitCommand {
        let mut cmd = GitCommand::clone(url, dest).timeout(Some(GIT_CLONE_TIMEOUT));
        if let Some(reference) = reference {
            cmd = cmd.branch(reference);
            if self.shallow {
                cmd = cmd.shallow();
            }
        }
        cmd.with_context(reference.unwrap_or("default branch").to_string())
    }
}

impl SourceFetch for GitSourceFetch {
    async fn fetch(&self, url: &str, reference: Option<&str>, dest: &Path) -> Result<()> {
        self.command(url, reference, dest)
            .execute_success()
            .await
            .with_context(|| format!("Failed to clone {url}"))
    }
}

/// Whether a working `git` is on PATH.
pub async fn is_git_installed() -> bool {
    GitCommand::version().execute().await.is_ok()
}
