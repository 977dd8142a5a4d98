//! Dependency installation.
//!
//! Releases and plugins declare their Python dependencies as plain requirement
//! lines. Only the lines that were not installed before are handed to the
//! [`PackageInstaller`]; the production installer runs
//! `<python> -m pip install [--no-dependencies] -U <packages...>`.

pub mod requirements;

use anyhow::{Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::UpgradeSettings;
use crate::constants::PACKAGE_INSTALL_TIMEOUT;
use crate::host::{InstallOptions, InstallStatus, PackageInstaller};

pub use requirements::{InstallChannel, requirements_delta};

/// Bytes of installer error output kept for the failure report.
const STDERR_TAIL: usize = 2000;

/// [`PackageInstaller`] running pip through a Python interpreter.
#[derive(Debug, Clone)]
pub struct PipInstaller {
    program: String,
    leading_args: Vec<String>,
    timeout: Duration,
}

impl PipInstaller {
    /// Use the interpreter configured in `settings`.
    #[must_use]
    pub fn from_settings(settings: &UpgradeSettings) -> Self {
        let (program, leading_args) = settings.python_command();
        Self {
            program,
            leading_args,
            timeout: PACKAGE_INSTALL_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments passed to the interpreter.
    #[must_use]
    pub fn arguments(&self, packages: &[String], options: InstallOptions) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.extend(["-m", "pip", "install"].map(str::to_string));
        if options.no_dependencies {
            args.push("--no-dependencies".to_string());
        }
        args.push("-U".to_string());
        args.extend(packages.iter().cloned());
        args
    }
}

impl PackageInstaller for PipInstaller {
    async fn install(&self, packages: &[String], options: InstallOptions) -> Result<InstallStatus> {
        if packages.is_empty() {
            debug!("No packages to install");
            return Ok(InstallStatus::Success);
        }

        let args = self.arguments(packages, options);
        info!("Installing {} package(s): {}", packages.len(), packages.join(" "));
        debug!("Executing: {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match timeout(self.timeout, output).await {
            Ok(result) => result.with_context(|| format!("Failed to run {}", self.program))?,
            Err(_) => {
                warn!("Package installation timed out after {}s", self.timeout.as_secs());
                return Ok(InstallStatus::Failed {
                    code: None,
                    stderr: format!("timed out after {} seconds", self.timeout.as_secs()),
                });
            }
        };

        if output.status.success() {
            return Ok(InstallStatus::Success);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let start = stderr.len().saturating_sub(STDERR_TAIL);
        let tail = stderr.get(start..).unwrap_or(&stderr).trim().to_string();
        warn!("Package installer exited with {:?}", output.status.code());
        Ok(InstallStatus::Failed {
            code: output.status.code(),
            stderr: tail,
        })
    }
}
