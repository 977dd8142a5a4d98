//! Upgrades of a single installed plugin.
//!
//! A plugin is upgraded from the repository recorded in its registry entry
//! (`plugins/<id>.json`). The flow mirrors the system upgrade with a smaller
//! footprint: no backup is taken and nothing is rolled back, a failure after
//! the confirmation leaves the plugin in whatever state the failing step
//! reached and ends in [`UpgradeState::Failed`].
//!
//! ```text
//! Checking ─┬─ UpToDate
//!           └─ AwaitingFinalConfirm ── Installing ── ReconcilingConfig ── Reloading ── Success
//! ```

use anyhow::{Context, Result, anyhow};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::UpgradeSettings;
use crate::constants::{PLUGIN_CONFIG_TEMPLATE, PLUGIN_EMOJI_PACK, PLUGIN_MANIFEST};
use crate::core::UpgradeError;
use crate::host::{
    Collaborators, ExtensionHost, FileTransfer, InstallOptions, InstallStatus, Operator,
    PackageInstaller, Session, SourceFetch, View,
};
use crate::installer::requirements_delta;
use crate::layout::InstallLayout;
use crate::manifest::emoji::{EmojiPack, plan_replacement};
use crate::manifest::plugin::{BRIDGE_SERVICE, EMOJI_SERVICE};
use crate::manifest::{PluginManifest, validate_plugin_id};
use crate::merge::{ConfigMerger, MergeOutcome};
use crate::upgrade::orchestrator::preunload;
use crate::upgrade::prompt::confirm;
use crate::upgrade::{UpgradeLock, UpgradeState};
use crate::utils::fs::{read_json, write_json};


/// How a plugin upgrade ended.
#[derive(Debug, Clone, Default)]
pub struct PluginReport {
    pub transitions: Vec<UpgradeState>,
    /// The manifest fetched from the plugin repository.
    pub manifest: Option<PluginManifest>,
    pub config: Option<MergeOutcome>,
    pub warnings: Vec<String>,
    /// The plugin bridges to another platform and a restart may be needed.
    pub restart_suggested: bool,
    pub error: Option<UpgradeError>,
}

impl PluginReport {
    #[must_use]
    pub fn state(&self) -> Option<UpgradeState> {
        self.transitions.last().copied()
    }

    #[must_use]
    pub fn passed_through(&self, state: UpgradeState) -> bool {
        self.transitions.contains(&state)
    }
}

/// Installs a newer release of an already registered plugin.
pub struct PluginInstaller<'a, S, P, F, H, O> {
    env: &'a Collaborators<S, P, F, H, O>,
    layout: InstallLayout,
    confirm_timeout: Duration,
}

impl<'a, S, P, F, H, O> PluginInstaller<'a, S, P, F, H, O>
where
    S: SourceFetch,
    P: PackageInstaller,
    F: FileTransfer,
    H: ExtensionHost,
    O: Operator,
{
    pub fn new(
        env: &'a Collaborators<S, P, F, H, O>,
        root: impl Into<std::path::PathBuf>,
        settings: &UpgradeSettings,
    ) -> Self {
        Self {
            env,
            layout: InstallLayout::new(root),
            confirm_timeout: settings.confirm_timeout(),
        }
    }

    #[must_use]
    pub const fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    /// Upgrade plugin `id` for `session`.
    ///
    /// As with the system upgrade only a pending reboot or a concurrent
    /// upgrade is returned as an error.
    pub async fn run(&self, session: Session, id: &str, force: bool) -> Result<PluginReport> {
        if self.env.host.reboot_pending() {
            return Err(UpgradeError::RebootPending.into());
        }
        let _lock = UpgradeLock::acquire(&self.layout.recovery_dir()).await?;

        let mut report = PluginReport::default();
        self.transition(&mut report, UpgradeState::Checking).await;

        let recorded = match self.recorded(id).await {
            Ok(recorded) => recorded,
            Err(e) => {
                warn!("Plugin {id} is not installed");
                return Ok(self.finish(report, UpgradeState::CheckFailed, Some(e)).await);
            }
        };
        let (url, new) = match self.fetch(&recorded).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!("Could not fetch plugin {id}: {e:#}");
                let err = match e.downcast_ref::<UpgradeError>() {
                    Some(err @ UpgradeError::InvalidPluginManifest { .. }) => err.clone(),
                    _ => UpgradeError::CheckFailed {
                        reason: format!("{e:#}"),
                    },
                };
                return Ok(self.finish(report, UpgradeState::CheckFailed, Some(err)).await);
            }
        };
        if new.release <= recorded.release && !force {
            info!("Plugin {id} is up to date (release {})", recorded.release);
            return Ok(self
                .finish(report, UpgradeState::UpToDate, Some(UpgradeError::NoUpdateAvailable))
                .await);
        }
        report.manifest = Some(new.clone());

        self.transition(&mut report, UpgradeState::AwaitingFinalConfirm).await;
        self.render(View::PluginConfirm(new.clone())).await;
        if !confirm(&self.env.operator, &session, self.confirm_timeout).await {
            info!("Plugin upgrade cancelled");
            return Ok(self.finish(report, UpgradeState::Aborted, None).await);
        }

        match self.install(&mut report, &recorded, &new, &url).await {
            Ok(()) => {
                report.restart_suggested = new.has_service(BRIDGE_SERVICE);
                info!("Plugin {} upgraded to {}", new.id, new.version);
                Ok(self.finish(report, UpgradeState::Success, None).await)
            }
            Err(e) => {
                error!("Plugin upgrade failed: {e:#}");
                let err = match e.downcast::<UpgradeError>() {
                    Ok(err) => err,
                    Err(e) => UpgradeError::InstallFailed {
                        reason: format!("{e:#}"),
                    },
                };
                Ok(self.finish(report, UpgradeState::Failed, Some(err)).await)
            }
        }
    }

    /// The registry record of `id`.
    async fn recorded(&self, id: &str) -> Result<PluginManifest, UpgradeError> {
        let not_found = || UpgradeError::PluginNotFound {
            id: id.to_string(),
        };
        validate_plugin_id(id).map_err(|_| not_found())?;
        let path = self.layout.plugin_record(id);
        if !self.env.files.exists(&path).await {
            return Err(not_found());
        }
        read_json(&self.env.files, &path).await.map_err(|e| {
            debug!("Unreadable plugin record {}: {e:#}", path.display());
            not_found()
        })
    }

    /// Clone the recorded repository and read the new manifest.
    async fn fetch(&self, recorded: &PluginManifest) -> Result<(String, PluginManifest)> {
        let url = recorded.repository.clone().ok_or_else(|| UpgradeError::InvalidPluginManifest {
            reason: format!("plugin {} has no recorded repository", recorded.id),
        })?;
        let files = &self.env.files;
        let scratch = self.layout.plugin_scratch();

        files.remove_dir_all(&scratch).await?;
        self.env.source.fetch(&url, None, &scratch).await?;
        let new = PluginManifest::load(files, &scratch.join(PLUGIN_MANIFEST)).await?;
        debug!("Fetched {} {} (release {})", new.id, new.version, new.release);
        Ok((url, new))
    }

    async fn install(
        &self,
        report: &mut PluginReport,
        recorded: &PluginManifest,
        new: &PluginManifest,
        url: &str,
    ) -> Result<()> {
        self.transition(report, UpgradeState::Installing).await;
        self.install_dependencies(recorded, new).await?;
        self.install_modules(new).await?;
        if new.has_service(EMOJI_SERVICE) {
            self.install_emojis(new).await?;
        }

        self.transition(report, UpgradeState::ReconcilingConfig).await;
        let template = self.layout.plugin_scratch().join(PLUGIN_CONFIG_TEMPLATE);
        if self.env.files.exists(&template).await {
            let outcome =
                ConfigMerger::reconcile_file(&self.env.files, &self.layout.plugin_config(&new.id), &template)
                    .await?;
            if let MergeOutcome::Skipped {
                reason,
            } = &outcome
            {
                report.warnings.push(reason.clone());
                self.render(View::Warning(reason.clone())).await;
            }
            report.config = Some(outcome);
        }

        info!("Registering plugin {}", new.id);
        new.clone()
            .with_repository(url)
            .save(&self.env.files, &self.layout.plugin_record(&new.id))
            .await?;

        self.transition(report, UpgradeState::Reloading).await;
        self.reload(report, new).await;
        Ok(())
    }

    async fn install_dependencies(&self, recorded: &PluginManifest, new: &PluginManifest) -> Result<()> {
        let Some(wanted) = &new.requirements else {
            return Ok(());
        };
        let delta = requirements_delta(recorded.requirements.as_deref().unwrap_or_default(), wanted);
        if delta.is_empty() {
            return Ok(());
        }

        debug!("Installing: {}", delta.join(" "));
        let options = InstallOptions {
            no_dependencies: true,
        };
        let status = match self.env.packages.install(&delta, options).await {
            Ok(InstallStatus::Success) => return Ok(()),
            Ok(InstallStatus::Failed {
                code,
                ..
            }) => code.map_or_else(|| "terminated".to_string(), |c| format!("exit code {c}")),
            Err(e) => format!("{e:#}"),
        };
        Err(UpgradeError::DependencyInstallFailed {
            packages: delta.join(" "),
            status,
        }
        .into())
    }

    async fn install_modules(&self, new: &PluginManifest) -> Result<()> {
        let scratch = self.layout.plugin_scratch();
        let targets = new
            .modules
            .iter()
            .map(|m| (m, self.layout.modules_dir()))
            .chain(new.utils.iter().map(|u| (u, self.layout.utils_dir())));
        for (name, dir) in targets {
            debug!("Installing: {name}");
            self.env.files.copy_file(&scratch.join(name), &dir.join(name)).await?;
        }
        Ok(())
    }

    /// Replace outdated custom emojis and install the plugin's emoji pack.
    async fn install_emojis(&self, new: &PluginManifest) -> Result<()> {
        let files = &self.env.files;
        let host = &self.env.host;
        let scratch = self.layout.plugin_scratch();
        let pack_path = self.layout.emoji_pack(&new.id);

        let installed: Option<EmojiPack> = if files.exists(&pack_path).await {
            Some(read_json(files, &pack_path).await?)
        } else {
            None
        };
        let mut pack: EmojiPack = read_json(files, &scratch.join(PLUGIN_EMOJI_PACK))
            .await
            .context("Plugin declares an emoji pack but ships no emoji.json")?;
        pack.validate_sources()?;
        let plan = plan_replacement(installed.as_ref(), &pack);

        info!("Uninstalling previous emoji pack");
        for id in &plan.remove {
            debug!("Removing: {id}");
            host.delete_custom_emoji(*id).await?;
        }

        info!("Installing new emoji pack");
        for name in &plan.upload {
            let entry = pack.emojis.get_mut(name).ok_or_else(|| anyhow!("emoji {name} vanished"))?;
            let image = scratch.join(crate::constants::EMOJIS_DIR).join(&entry.0);
            debug!("Installing: {}", image.display());
            entry.0 = host.create_custom_emoji(name, &image).await?.render();
        }
        if let Some(installed) = &installed {
            for name in &plan.keep {
                if let (Some(entry), Some(old)) = (pack.emojis.get_mut(name), installed.emojis.get(name)) {
                    entry.0.clone_from(&old.0);
                }
            }
        }
        pack.installed = true;
        write_json(files, &pack_path, &pack).await?;

        let active_path = self.layout.active_emoji_pack();
        if !files.exists(&active_path).await {
            return Ok(());
        }
        let active: EmojiPack = read_json(files, &active_path).await?;
        if active.id.as_deref() == Some(new.id.as_str()) {
            debug!("Emoji pack of {} is active, refreshing", new.id);
            pack.id = Some(new.id.clone());
            write_json(files, &active_path, &pack).await?;
            host.refresh_emojis().await?;
        }
        Ok(())
    }

    /// Reload the plugin's modules that are currently loaded.
    async fn reload(&self, report: &mut PluginReport, new: &PluginManifest) {
        let loaded = self.env.host.loaded_extensions();
        let plugins_dir = self.layout.plugins_dir();
        for extension in new.extension_names().filter(|e| loaded.contains(e)) {
            debug!("Reloading extension: {extension}");
            let reloaded = match preunload(&self.env.files, &self.env.host, &plugins_dir, &extension).await {
                Ok(()) => self.env.host.reload_extension(&extension).await,
                Err(e) => Err(e),
            };
            if let Err(e) = reloaded {
                warn!("{extension} could not be reloaded: {e:#}");
                let message = format!("{extension} could not be reloaded");
                self.render(View::Warning(message.clone())).await;
                report.warnings.push(message);
            }
        }
    }

    async fn transition(&self, report: &mut PluginReport, state: UpgradeState) {
        info!("Plugin upgrade state: {state}");
        report.transitions.push(state);
        self.render(View::State(state)).await;
    }

    async fn finish(
        &self,
        mut report: PluginReport,
        state: UpgradeState,
        error: Option<UpgradeError>,
    ) -> PluginReport {
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
