//! The system upgrade flow.
//!
//! The backup is taken before the final confirmation so the operator sees its
//! outcome when confirming. Aborting at either prompt therefore leaves the
//! installation untouched, while an abort at the final confirmation may
//! already have refreshed the recovery directory (`old/`).

use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::backup::{BackupManager, BackupManifest};
use super::lock::UpgradeLock;
use super::prompt::{confirm, next_decision};
use super::state::UpgradeState;
use super::{UpgradeFlags, UpgradeReport};
use crate::config::UpgradeSettings;
use crate::constants::MANUAL_RECOVERY_HINT;
use crate::core::UpgradeError;
use crate::host::{
    BackupReport, Collaborators, Decision, ExtensionHost, FileTransfer, InstallOptions,
    InstallStatus, Operator, PackageInstaller, Session, SourceFetch, View,
};
use crate::installer::requirements::{InstallChannel, read_requirements, requirements_delta};
use crate::layout::InstallLayout;
use crate::manifest::plugin::find_owner;
use crate::manifest::{CurrentState, ReleaseDescriptor, RemoteManifest};
use crate::merge::{ConfigMerger, MergeOutcome};
use crate::resolver::VersionResolver;

/// Result of the check step.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub current: CurrentState,
    pub manifest: RemoteManifest,
    pub candidates: Vec<ReleaseDescriptor>,
}

/// Drives the system upgrade from check to reload, with rollback.
pub struct UpgradeOrchestrator<'a, S, P, F, H, O> {
    env: &'a Collaborators<S, P, F, H, O>,
    layout: InstallLayout,
    settings: &'a UpgradeSettings,
    confirm_timeout: Duration,
}

impl<'a, S, P, F, H, O> UpgradeOrchestrator<'a, S, P, F, H, O>
where
    S: SourceFetch,
    P: PackageInstaller,
    F: FileTransfer,
    H: ExtensionHost,
    O: Operator,
{
    pub fn new(
        env: &'a Collaborators<S, P, F, H, O>,
        root: impl Into<PathBuf>,
        settings: &'a UpgradeSettings,
    ) -> Self {
        Self {
            env,
            layout: InstallLayout::new(root),
            settings,
            confirm_timeout: settings.confirm_timeout(),
        }
    }

    /// Override the confirmation timeout from the settings.
    #[must_use]
    pub const fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    /// Run the whole flow for `session`.
    ///
    /// Only a pending reboot or a concurrent upgrade is returned as an error.
    /// Every other outcome, including failures, is a terminal state of the
    /// returned report.
    pub async fn run(&self, session: Session, flags: UpgradeFlags) -> Result<UpgradeReport> {
        if self.env.host.reboot_pending() {
            return Err(UpgradeError::RebootPending.into());
        }
        let _lock = UpgradeLock::acquire(&self.layout.recovery_dir()).await?;

        let mut report = UpgradeReport::default();

        // 1. Check
        self.transition(&mut report, UpgradeState::Checking).await;
        let check = match self.check(flags.force).await {
            Ok(check) => check,
            Err(e) => {
                error!("Update check failed: {e:#}");
                return Ok(self
                    .finish(report, UpgradeState::CheckFailed, Some(check_failed(&e)))
                    .await);
            }
        };
        if check.candidates.is_empty() {
            info!("No upgrades available (release {})", check.current.release);
            return Ok(self
                .finish(report, UpgradeState::UpToDate, Some(UpgradeError::NoUpdateAvailable))
                .await);
        }

        // 2. Selection
        self.transition(&mut report, UpgradeState::AwaitingSelection).await;
        let Some(index) = self.select(&session, &check).await else {
            info!("Upgrade cancelled at selection");
            return Ok(self.finish(report, UpgradeState::Aborted, None).await);
        };
        let descriptor = check.candidates[index].clone();
        let reboot = descriptor.requires_reboot(&check.current);
        info!(
            "Selected {} {} (release {}, reboot required: {reboot})",
            descriptor.label(),
            descriptor.version,
            descriptor.release
        );
        report.selected = Some(descriptor.clone());

        // 3. Backup
        let mut backup = None;
        let backup_report = if flags.no_backup {
            info!("Skipping backup");
            BackupReport::Skipped
        } else {
            self.transition(&mut report, UpgradeState::BackingUp).await;
            match BackupManager::new(&self.env.files, &self.layout)
                .create_backup(&self.settings.backup_targets())
                .await
            {
                Ok(manifest) => {
                    backup = Some(manifest);
                    BackupReport::Completed
                }
                Err(e) if flags.ignore_backup => {
                    warn!("Backup failed, continuing as requested: {e:#}");
                    report.warnings.push(format!("Backup failed: {e:#}"));
                    BackupReport::FailedIgnored
                }
                Err(e) => {
                    let err = UpgradeError::BackupFailed {
                        reason: format!("{e:#}"),
                    };
                    return Ok(self.fail(report, UpgradeState::BackupFailed, err, None, &[]).await);
                }
            }
        };
        report.backup = Some(backup_report);

        // 4. Final confirmation
        self.transition(&mut report, UpgradeState::AwaitingFinalConfirm).await;
        self.render(View::FinalConfirm(backup_report)).await;
        if !confirm(&self.env.operator, &session, self.confirm_timeout).await {
            info!("Upgrade cancelled at final confirmation");
            return Ok(self.finish(report, UpgradeState::Aborted, None).await);
        }

        // 5. Download
        self.transition(&mut report, UpgradeState::Downloading).await;
        if let Err(e) = self.download(&descriptor).await {
            let err = UpgradeError::DownloadFailed {
                reference: descriptor.version.clone(),
                reason: format!("{e:#}"),
            };
            return Ok(self.fail(report, UpgradeState::DownloadFailed, err, backup.as_ref(), &[]).await);
        }

        // 6-8. Dependencies, payload, configuration
        self.transition(&mut report, UpgradeState::Installing).await;
        let mut created = Vec::new();
        let installed = match self.install_dependencies().await {
            Ok(()) => self.install_payload(&descriptor, &check.current, &mut created).await.map_err(|e| {
                UpgradeError::InstallFailed {
                    reason: format!("{e:#}"),
                }
            }),
            Err(e) => Err(e),
        };
        let installed = match installed {
            Ok(()) => {
                self.transition(&mut report, UpgradeState::ReconcilingConfig).await;
                self.reconcile_config().await.map_err(|e| UpgradeError::InstallFailed {
                    reason: format!("{e:#}"),
                })
            }
            Err(e) => Err(e),
        };
        match installed {
            Ok(outcome) => {
                if let MergeOutcome::Skipped {
                    reason,
                } = &outcome
                {
                    report.warnings.push(reason.clone());
                    self.render(View::Warning(reason.clone())).await;
                }
                report.config = Some(outcome);
            }
            Err(e) => {
                return Ok(self.fail(report, UpgradeState::Failed, e, backup.as_ref(), &created).await);
            }
        }

        // 9. Reboot or reload
        if reboot {
            self.transition(&mut report, UpgradeState::AwaitingReboot).await;
            if let Err(e) = self.env.host.flag_reboot().await {
                error!("Could not flag the reboot: {e:#}");
                report.warnings.push(format!("Restart the bot manually: {e:#}"));
            }
            info!("Upgrade complete, reboot required");
        } else {
            self.transition(&mut report, UpgradeState::Reloading).await;
            self.reload_all(&mut report).await;
            info!("Upgrade complete");
        }
        Ok(self.finish(report, UpgradeState::Success, None).await)
    }

    /// Fetch the check endpoint and resolve candidates without changing anything.
    pub async fn check(&self, force: bool) -> Result<CheckResult> {
        self.settings.require_endpoints()?;
        let files = &self.env.files;
        let scratch = self.layout.check_scratch();

        files.remove_dir_all(&scratch).await?;
        self.env
            .source
            .fetch(&self.settings.check_endpoint, Some(&self.settings.branch), &scratch)
            .await?;

        let current = CurrentState::load(files, &self.layout.system_record())
            .await
            .context("Failed to read the current version record")?;
        let manifest = RemoteManifest::load(files, &self.layout.remote_manifest())
            .await
            .context("Failed to read the remote manifest")?;
        let candidates = VersionResolver::new().force(force).resolve(&current, &manifest);

        Ok(CheckResult {
            current,
            manifest,
            candidates,
        })
    }

    /// Present candidates until the operator accepts or rejects.
    async fn select(&self, session: &Session, check: &CheckResult) -> Option<usize> {
        let mut selected = 0;
        loop {
            let descriptor = &check.candidates[selected];
            self.render(View::Candidates {
                current: check.current.clone(),
                candidates: check.candidates.clone(),
                selected,
                reboot_required: descriptor.requires_reboot(&check.current),
                release_notes: self.settings.release_notes_url.clone(),
            })
            .await;

            loop {
                match next_decision(&self.env.operator, session, self.confirm_timeout).await? {
                    Decision::Accept => return Some(selected),
                    Decision::Reject => return None,
                    Decision::Select(index) if check.candidates.len() > 1 && index < check.candidates.len() => {
                        debug!("Operator selected candidate {index}");
                        selected = index;
                        break;
                    }
                    Decision::Select(index) => {
                        debug!("Ignoring selection {index} of {}", check.candidates.len());
                    }
                }
            }
        }
    }

    async fn download(&self, descriptor: &ReleaseDescriptor) -> Result<()> {
        let files = &self.env.files;
        let scratch = self.layout.update_scratch();

        files.remove_dir_all(&scratch).await?;
        self.env.source.fetch(&self.settings.files_url(), Some(&descriptor.version), &scratch).await?;

        let record = self.layout.fetched_system_record();
        if !files.exists(&record).await {
            return Err(anyhow!("fetched tree has no {}", record.display()));
        }
        Ok(())
    }

    async fn install_dependencies(&self) -> Result<(), UpgradeError> {
        let files = &self.env.files;
        let channel = InstallChannel::detect(files, self.layout.root()).await;
        let name = channel.requirements_file();
        let as_install_failure = |e: anyhow::Error| UpgradeError::InstallFailed {
            reason: format!("{e:#}"),
        };

        let new = read_requirements(files, &self.layout.update_scratch().join(name))
            .await
            .map_err(as_install_failure)?
            .unwrap_or_else(|| {
                warn!("Release ships no {name}, skipping dependencies");
                Vec::new()
            });
        let old = read_requirements(files, &self.layout.join(name))
            .await
            .map_err(as_install_failure)?
            .unwrap_or_else(|| {
                warn!("Could not find {name}, installing all dependencies");
                Vec::new()
            });

        let delta = requirements_delta(&old, &new);
        if delta.is_empty() {
            debug!("Dependencies are up to date");
            return Ok(());
        }

        let failed = |status: String| UpgradeError::DependencyInstallFailed {
            packages: delta.join(" "),
            status,
        };
        match self.env.packages.install(&delta, InstallOptions::default()).await {
            Ok(InstallStatus::Success) => Ok(()),
            Ok(InstallStatus::Failed {
                code,
                stderr,
            }) => {
                debug!("Installer output: {stderr}");
                Err(failed(code.map_or_else(|| "terminated".to_string(), |c| format!("exit code {c}"))))
            }
            Err(e) => Err(failed(format!("{e:#}"))),
        }
    }

    /// Copy the payload and rewrite the version record.
    ///
    /// Payload files that did not exist before are appended to `created` as
    /// they are installed.
    async fn install_payload(
        &self,
        descriptor: &ReleaseDescriptor,
        current: &CurrentState,
        created: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let files = &self.env.files;
        let scratch = self.layout.update_scratch();
        let payload = &self.settings.payload;

        for relative in &payload.files {
            let source = scratch.join(relative);
            if !files.exists(&source).await {
                debug!("Release does not ship {}", relative.display());
                continue;
            }
            self.install_file(&source, relative, created).await?;
        }

        for dir in &payload.dirs {
            let source = scratch.join(&dir.path);
            if !files.exists(&source).await {
                debug!("Release does not ship {}/", dir.path.display());
                continue;
            }
            for file in files.list_files(&source).await? {
                if !dir.accepts(&file) {
                    continue;
                }
                let Some(name) = file.file_name() else { continue };
                self.install_file(&file, &dir.path.join(name), created).await?;
            }
        }

        let fetched = if descriptor.is_legacy() {
            None
        } else {
            Some(CurrentState::load(files, &self.layout.fetched_system_record()).await?)
        };
        let next = current.after_install(descriptor, fetched.as_ref());
        next.save(files, &self.layout.system_record()).await?;
        info!("Version record updated to {} (release {})", next.version, next.release);
        Ok(())
    }

    async fn install_file(&self, source: &Path, relative: &Path, created: &mut Vec<PathBuf>) -> Result<()> {
        let target = self.layout.join(relative);
        let existed = self.env.files.exists(&target).await;
        debug!("Installing: {}", relative.display());
        self.env.files.copy_file(source, &target).await?;
        if !existed {
            created.push(relative.to_path_buf());
        }
        Ok(())
    }

    async fn reconcile_config(&self) -> Result<MergeOutcome> {
        let incoming = self.layout.update_scratch().join(crate::constants::MAIN_CONFIG);
        ConfigMerger::reconcile_file(&self.env.files, &self.layout.main_config(), &incoming).await
    }

    /// Reload every loaded extension, running its owner's shutdown check first.
    async fn reload_all(&self, report: &mut UpgradeReport) {
        for extension in self.env.host.loaded_extensions() {
            debug!("Reloading extension: {extension}");
            if let Err(e) = self.reload_one(&extension).await {
                warn!("{extension} could not be reloaded: {e:#}");
                let message = format!("{extension} could not be reloaded");
                self.render(View::Warning(message.clone())).await;
                report.warnings.push(message);
            }
        }
    }

    async fn reload_one(&self, extension: &str) -> Result<()> {
        preunload(&self.env.files, &self.env.host, &self.layout.plugins_dir(), extension).await?;
        self.env.host.reload_extension(extension).await
    }

    /// End the run on `error`, restoring the backup when the failure
    /// happened after files were mutated.
    async fn fail(
        &self,
        report: UpgradeReport,
        state: UpgradeState,
        error: UpgradeError,
        backup: Option<&BackupManifest>,
        created: &[PathBuf],
    ) -> UpgradeReport {
        if error.requires_rollback() {
            error!("Upgrade failed, attempting rollback: {error}");
            self.rollback(report, backup, created, error).await
        } else {
            error!("{error}, no rollback required");
            self.finish(report, state, Some(error)).await
        }
    }

    async fn rollback(
        &self,
        mut report: UpgradeReport,
        backup: Option<&BackupManifest>,
        created: &[PathBuf],
        cause: UpgradeError,
    ) -> UpgradeReport {
        self.transition(&mut report, UpgradeState::RollingBack).await;
        report.error = Some(cause);

        let manager = BackupManager::new(&self.env.files, &self.layout);
        let restored = match backup {
            Some(manifest) => match manager.restore(manifest).await {
                Ok(count) => manager.discard(created).await.map(|()| count),
                Err(e) => Err(e),
            },
            None => Err(anyhow!("no backup was taken for this upgrade")),
        };

        match restored {
            Ok(count) => {
                info!("Rollback success ({count} file(s) restored)");
                self.finish(report, UpgradeState::RollbackOk, None).await
            }
            Err(e) => {
                error!("Rollback failed: {e:#}");
                error!("The rollback failed. {MANUAL_RECOVERY_HINT}");
                let err = UpgradeError::RollbackFailed {
                    reason: format!("{e:#}"),
                };
                self.finish(report, UpgradeState::RollbackFailed, Some(err)).await
            }
        }
    }

    async fn transition(&self, report: &mut UpgradeReport, state: UpgradeState) {
        info!("Upgrade state: {state}");
        report.transitions.push(state);
        self.render(View::State(state)).await;
    }

    async fn finish(
        &self,
        mut report: UpgradeReport,
        state: UpgradeState,
        error: Option<UpgradeError>,
    ) -> UpgradeReport {
        if error.is_some() {
            report.error = error;
        }
        self.transition(&mut report, state).await;
        report
    }

    async fn render(&self, view: View) {
        if let Err(e) = self.env.operator.render(view).await {
            warn!("Could not update the operator view: {e:#}");
        }
    }
}

/// Run the shutdown check of the plugin owning `extension`, if it asks for one.
pub async fn preunload(
    files: &impl FileTransfer,
    host: &impl ExtensionHost,
    plugins_dir: &Path,
    extension: &str,
) -> Result<()> {
    match find_owner(files, plugins_dir, extension).await {
        Ok(Some(owner)) if owner.shutdown => {
            debug!("Running shutdown check of {} before unloading {extension}", owner.id);
            host.run_shutdown_check(&owner.id).await
        }
        Ok(_) => Ok(()),
        Err(e) => {
            debug!("Could not determine the owner of {extension}: {e:#}");
            Ok(())
        }
    }
}

fn check_failed(e: &anyhow::Error) -> UpgradeError {
    match e.downcast_ref::<UpgradeError>() {
        Some(err @ UpgradeError::CheckFailed { .. }) => err.clone(),
        _ => UpgradeError::CheckFailed {
            reason: format!("{e:#}"),
        },
    }
}
