use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::constants::CONFIRM_TIMEOUT;
use crate::core::UpgradeError;

fn default_branch() -> String {
    "main".to_string()
}

/// `py -3` on Windows, `python3` elsewhere.
fn default_python_binary() -> String {
    if cfg!(windows) { "py -3" } else { "python3" }.to_string()
}

const fn default_confirm_timeout_secs() -> u64 {
    CONFIRM_TIMEOUT.as_secs()
}

/// A directory copied file by file, optionally restricted to one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirSpec {
    /// Directory relative to the installation root.
    pub path: PathBuf,
    /// Only files with this extension (without the dot) are copied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

impl DirSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            extension: None,
        }
    }

    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Whether `file` passes the extension filter.
    #[must_use]
    pub fn accepts(&self, file: &Path) -> bool {
        match &self.extension {
            Some(ext) => file.extension().and_then(|e| e.to_str()) == Some(ext.as_str()),
            None => true,
        }
    }
}

/// What the backup step copies into the recovery directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSettings {
    #[serde(default = "BackupSettings::default_files")]
    pub files: Vec<PathBuf>,
    #[serde(default = "BackupSettings::default_dirs")]
    pub dirs: Vec<DirSpec>,
}

impl BackupSettings {
    fn default_files() -> Vec<PathBuf> {
        ["bot.py", "data.json", "config.toml", "boot_config.json"].map(PathBuf::from).to_vec()
    }

    fn default_dirs() -> Vec<DirSpec> {
        vec![
            DirSpec::new("cogs"),
            DirSpec::new("utils"),
            DirSpec::new("plugins"),
            DirSpec::new("languages").with_extension("json"),
            DirSpec::new("boot"),
        ]
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            files: Self::default_files(),
            dirs: Self::default_dirs(),
        }
    }
}

/// What the install step copies out of the fetched release.
///
/// `plugins/system.json` and `config.toml` are handled separately and must
/// not be listed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSettings {
    #[serde(default = "PayloadSettings::default_files")]
    pub files: Vec<PathBuf>,
    #[serde(default = "PayloadSettings::default_dirs")]
    pub dirs: Vec<DirSpec>,
}

impl PayloadSettings {
    fn default_files() -> Vec<PathBuf> {
        ["bot.py", "requirements.txt", "requirements_stable.txt", "emojis/base.json"]
            .map(PathBuf::from)
            .to_vec()
    }

    fn default_dirs() -> Vec<DirSpec> {
        vec![
            DirSpec::new("cogs"),
            DirSpec::new("utils"),
            DirSpec::new("languages").with_extension("json"),
        ]
    }
}

impl Default for PayloadSettings {
    fn default() -> Self {
        Self {
            files: Self::default_files(),
            dirs: Self::default_dirs(),
        }
    }
}

/// Settings of the upgrade and plugin flows (`botup.toml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeSettings {
    /// Branch of the check endpoint holding the remote manifest.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Repository URL holding `update.json` and `plugins/system.json`.
    #[serde(default)]
    pub check_endpoint: String,

    /// Base URL release repositories are fetched from.
    #[serde(default)]
    pub files_endpoint: String,

    /// Release repository name under [`files_endpoint`](Self::files_endpoint).
    #[serde(default)]
    pub files_repository: String,

    /// Interpreter used to run the package installer; may contain arguments.
    #[serde(default = "default_python_binary")]
    pub python_binary: String,

    /// Seconds the operator has to answer a confirmation prompt.
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,

    #[serde(default)]
    pub backup: BackupSettings,

    #[serde(default)]
    pub payload: PayloadSettings,

    /// Shown next to the candidate list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes_url: Option<String>,
}

impl Default for UpgradeSettings {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            check_endpoint: String::new(),
            files_endpoint: String::new(),
            files_repository: String::new(),
            python_binary: default_python_binary(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            backup: BackupSettings::default(),
            payload: PayloadSettings::default(),
            release_notes_url: None,
        }
    }
}

impl UpgradeSettings {
    /// Load settings from `path`, or defaults when the file does not exist.
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load_from(path).await
        } else {
            Ok(Self::default())
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))
    }

    #[must_use]
    pub const fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    /// Everything the backup step has to cover: the configured backup set plus
    /// every payload target the install step overwrites.
    #[must_use]
    pub fn backup_targets(&self) -> BackupSettings {
        let mut targets = self.backup.clone();
        for file in &self.payload.files {
            if !targets.files.contains(file) {
                targets.files.push(file.clone());
            }
        }
        for dir in &self.payload.dirs {
            if !targets.dirs.contains(dir) {
                targets.dirs.push(dir.clone());
            }
        }
        targets
    }

    /// URL of the release repository.
    #[must_use]
    pub fn files_url(&self) -> String {
        format!("{}/{}.git", self.files_endpoint.trim_end_matches('/'), self.files_repository)
    }

    /// Interpreter program and its leading arguments.
    #[must_use]
    pub fn python_command(&self) -> (String, Vec<String>) {
        let mut parts = self.python_binary.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(default_python_binary);
        (program, parts.collect())
    }

    /// Fail early when the endpoints needed by the system upgrade are not configured.
    pub fn require_endpoints(&self) -> Result<(), UpgradeError> {
        let missing = [
            ("check_endpoint", &self.check_endpoint),
            ("files_endpoint", &self.files_endpoint),
            ("files_repository", &self.files_repository),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect::<Vec<_>>();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(UpgradeError::CheckFailed {
                reason: format!("{} not configured in botup.toml", missing.join(", ")),
            })
        }
    }
}
