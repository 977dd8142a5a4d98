use anyhow::{Result, anyhow, bail};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::host::{
    ExtensionHost, FileTransfer, InstallOptions, InstallStatus, Interaction, Operator,
    PackageInstaller, Session, SourceFetch, View, actions,
};
use crate::manifest::emoji::CustomEmoji;
use crate::utils::fs::LocalFileTransfer;

/// The session every scripted interaction belongs to by default.
pub const SESSION: Session = Session {
    actor_id: 1,
    message_id: 10,
};

/// A fixture tree: relative path to file content.
pub type Tree = BTreeMap<PathBuf, Vec<u8>>;

/// Operator replaying a fixed script.
///
/// Once the script is exhausted `next_interaction` never resolves, so the
/// flow under test runs into its confirmation timeout.
#[derive(Default)]
pub struct ScriptedOperator {
    script: Mutex<VecDeque<Interaction>>,
    views: Mutex<Vec<View>>,
}

impl ScriptedOperator {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, actor_id: u64, message_id: u64, action: &str, value: Option<String>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Interaction {
                actor_id,
                message_id,
                action_id: action.to_string(),
                selected_value: value,
            });
        }
        self
    }

    #[must_use]
    pub fn accept(self) -> Self {
        self.push(SESSION.actor_id, SESSION.message_id, actions::ACCEPT, None)
    }

    #[must_use]
    pub fn reject(self) -> Self {
        self.push(SESSION.actor_id, SESSION.message_id, actions::REJECT, None)
    }

    #[must_use]
    pub fn select(self, index: usize) -> Self {
        self.push(SESSION.actor_id, SESSION.message_id, actions::SELECTION, Some(index.to_string()))
    }

    /// An interaction from an arbitrary actor and message.
    #[must_use]
    pub fn from_actor(self, actor_id: u64, message_id: u64, action: &str) -> Self {
        self.push(actor_id, message_id, action, None)
    }

    /// Every view rendered so far.
    pub fn views(&self) -> Vec<View> {
        self.views.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Interactions not consumed by the flow.
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or_default()
    }
}

impl Operator for ScriptedOperator {
    async fn render(&self, view: View) -> Result<()> {
        self.views.lock().map_err(|_| anyhow!("poisoned"))?.push(view);
        Ok(())
    }

    async fn next_interaction(&self) -> Option<Interaction> {
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(event) => Some(event),
            None => std::future::pending().await,
        }
    }
}

/// Extension host recording every call.
#[derive(Default)]
pub struct RecordingHost {
    pub extensions: Vec<String>,
    /// Extensions whose reload fails.
    pub broken: HashSet<String>,
    pub pending_reboot: bool,
    reboot_flagged: AtomicBool,
    reloads: Mutex<Vec<String>>,
    shutdown_checks: Mutex<Vec<String>>,
    emoji_refreshes: AtomicU64,
    deleted_emojis: Mutex<Vec<u64>>,
    created_emojis: Mutex<Vec<String>>,
    next_emoji_id: AtomicU64,
}

impl RecordingHost {
    pub fn with_extensions(extensions: &[&str]) -> Self {
        Self {
            extensions: extensions.iter().map(|e| (*e).to_string()).collect(),
            next_emoji_id: AtomicU64::new(1000),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn broken(mut self, extension: &str) -> Self {
        self.broken.insert(extension.to_string());
        self
    }

    pub fn reboot_flagged(&self) -> bool {
        self.reboot_flagged.load(Ordering::SeqCst)
    }

    pub fn reloads(&self) -> Vec<String> {
        self.reloads.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn shutdown_checks(&self) -> Vec<String> {
        self.shutdown_checks.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn emoji_refreshes(&self) -> u64 {
        self.emoji_refreshes.load(Ordering::SeqCst)
    }

    pub fn deleted_emojis(&self) -> Vec<u64> {
        self.deleted_emojis.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn created_emojis(&self) -> Vec<String> {
        self.created_emojis.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl ExtensionHost for RecordingHost {
    fn loaded_extensions(&self) -> Vec<String> {
        self.extensions.clone()
    }

    async fn reload_extension(&self, extension: &str) -> Result<()> {
        if self.broken.contains(extension) {
            bail!("{extension} raised during setup");
        }
        self.reloads.lock().map_err(|_| anyhow!("poisoned"))?.push(extension.to_string());
        Ok(())
    }

    async fn run_shutdown_check(&self, plugin_id: &str) -> Result<()> {
        self.shutdown_checks.lock().map_err(|_| anyhow!("poisoned"))?.push(plugin_id.to_string());
        Ok(())
    }

    async fn flag_reboot(&self) -> Result<()> {
        self.reboot_flagged.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn reboot_pending(&self) -> bool {
        self.pending_reboot || self.reboot_flagged()
    }

    async fn refresh_emojis(&self) -> Result<()> {
        self.emoji_refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_custom_emoji(&self, id: u64) -> Result<()> {
        self.deleted_emojis.lock().map_err(|_| anyhow!("poisoned"))?.push(id);
        Ok(())
    }

    async fn create_custom_emoji(&self, name: &str, image: &Path) -> Result<CustomEmoji> {
        if !tokio::fs::try_exists(image).await.unwrap_or(false) {
            bail!("emoji image {} does not exist", image.display());
        }
        self.created_emojis.lock().map_err(|_| anyhow!("poisoned"))?.push(name.to_string());
        Ok(CustomEmoji {
            name: name.to_string(),
            id: self.next_emoji_id.fetch_add(1, Ordering::SeqCst),
            animated: false,
        })
    }
}

/// Source fetch writing fixture trees instead of cloning.
#[derive(Default)]
pub struct FakeSource {
    trees: BTreeMap<(String, Option<String>), Tree>,
    fetches: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `tree` for `url` at `reference`.
    #[must_use]
    pub fn serve(mut self, url: &str, reference: Option<&str>, tree: Tree) -> Self {
        self.trees.insert((url.to_string(), reference.map(str::to_string)), tree);
        self
    }

    pub fn fetches(&self) -> Vec<(String, Option<String>)> {
        self.fetches.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl SourceFetch for FakeSource {
    async fn fetch(&self, url: &str, reference: Option<&str>, dest: &Path) -> Result<()> {
        let key = (url.to_string(), reference.map(str::to_string));
        self.fetches.lock().map_err(|_| anyhow!("poisoned"))?.push(key.clone());

        let tree = self
            .trees
            .get(&key)
            .ok_or_else(|| anyhow!("remote branch {} not found in {url}", reference.unwrap_or("HEAD")))?;
        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            bail!("destination path '{}' already exists", dest.display());
        }
        tokio::fs::create_dir_all(dest).await?;
        for (relative, content) in tree {
            LocalFileTransfer.write(&dest.join(relative), content).await?;
        }
        Ok(())
    }
}

/// Package installer returning a fixed status.
pub struct FakeInstaller {
    status: InstallStatus,
    calls: Mutex<Vec<(Vec<String>, InstallOptions)>>,
}

impl Default for FakeInstaller {
    fn default() -> Self {
        Self::succeeding()
    }
}

impl FakeInstaller {
    pub fn succeeding() -> Self {
        Self {
            status: InstallStatus::Success,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(code: i32) -> Self {
        Self {
            status: InstallStatus::Failed {
                code: Some(code),
                stderr: "ERROR: No matching distribution found".to_string(),
            },
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Vec<String>, InstallOptions)> {
        self.calls.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl PackageInstaller for FakeInstaller {
    async fn install(&self, packages: &[String], options: InstallOptions) -> Result<InstallStatus> {
        self.calls.lock().map_err(|_| anyhow!("poisoned"))?.push((packages.to_vec(), options));
        Ok(self.status.clone())
    }
}

/// Local file transfer that fails copies and writes touching chosen paths.
#[derive(Default)]
pub struct FailingFiles {
    inner: LocalFileTransfer,
    /// Substrings of paths (source or destination) that fail.
    fail_on: Vec<String>,
}

impl FailingFiles {
    pub fn failing_on(patterns: &[&str]) -> Self {
        Self {
            inner: LocalFileTransfer,
            fail_on: patterns.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    fn check(&self, path: &Path) -> Result<()> {
        let display = path.to_string_lossy().replace('\\', "/");
        match self.fail_on.iter().find(|p| display.contains(p.as_str())) {
            Some(pattern) => bail!("injected failure for {} ({pattern})", path.display()),
            None => Ok(()),
        }
    }
}

impl FileTransfer for FailingFiles {
    async fn copy_file(&self, src: &Path, dst: &Path) -> Result<()> {
        self.check(src)?;
        self.check(dst)?;
        self.inner.copy_file(src, dst).await
    }

    async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.inner.list_files(dir).await
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.check(path)?;
        self.inner.write(path, contents).await
    }

    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        self.inner.ensure_dir(path).await
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        self.check(path)?;
        self.inner.remove_file(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.inner.remove_dir_all(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path).await
    }
}
