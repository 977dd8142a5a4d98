//! Plugin registry records (`plugins/<id>.json`) and remote plugin manifests.

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

use crate::constants::{PLUGIN_ID_PATTERN, SYSTEM_PLUGIN_ID};
use crate::core::UpgradeError;
use crate::host::FileTransfer;
use crate::utils::fs::{read_json, write_json};

/// Service name declaring that a plugin ships an emoji pack.
pub const EMOJI_SERVICE: &str = "emojis";

/// Service name of plugins that bridge to another chat platform.
pub const BRIDGE_SERVICE: &str = "bridge_platform";

/// Manifest of a plugin, as published in `plugin.json` and persisted in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    pub release: i64,
    /// Extension module file names, installed into `cogs/`.
    #[serde(default)]
    pub modules: Vec<String>,
    /// Utility module file names, installed into `utils/`.
    #[serde(default)]
    pub utils: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Vec<String>>,
    /// Whether the plugin wants its shutdown check run before its modules unload.
    #[serde(default)]
    pub shutdown: bool,
    /// Source repository URL, recorded at install time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PluginManifest {
    /// Read a manifest and validate its id and module file names.
    pub async fn load(files: &impl FileTransfer, path: &Path) -> Result<Self> {
        let manifest: Self = read_json(files, path).await.map_err(|e| {
            UpgradeError::InvalidPluginManifest {
                reason: format!("{e:#}"),
            }
        })?;
        validate_plugin_id(&manifest.id)?;
        for name in manifest.modules.iter().chain(&manifest.utils) {
            validate_file_name(name)?;
        }
        Ok(manifest)
    }

    pub async fn save(&self, files: &impl FileTransfer, path: &Path) -> Result<()> {
        write_json(files, path, self).await
    }

    #[must_use]
    pub fn has_service(&self, service: &str) -> bool {
        self.services.iter().any(|s| s == service)
    }

    /// Whether `module` (a file name such as `bridge.py`) belongs to this plugin.
    #[must_use]
    pub fn owns_module(&self, module: &str) -> bool {
        self.modules.iter().any(|m| m == module)
    }

    /// Extension names (`cogs.<stem>`) of this plugin's modules.
    pub fn extension_names(&self) -> impl Iterator<Item = String> + '_ {
        self.modules
            .iter()
            .map(|module| format!("cogs.{}", module.strip_suffix(".py").unwrap_or(module)))
    }

    /// The same manifest with `repository` set.
    #[must_use]
    pub fn with_repository(mut self, url: impl Into<String>) -> Self {
        self.repository = Some(url.into());
        self
    }
}

fn id_regex() -> Option<&'static Regex> {
    static ID_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    ID_REGEX.get_or_init(|| Regex::new(PLUGIN_ID_PATTERN).ok()).as_ref()
}

/// Check a plugin id against the allowed pattern.
///
/// Ids are lowercase ASCII letters, digits, `_` and `-`. An empty id is
/// rejected as well since it would name the registry directory itself.
pub fn validate_plugin_id(id: &str) -> Result<(), UpgradeError> {
    if id.is_empty() || !id_regex().is_some_and(|re| re.is_match(id)) {
        return Err(UpgradeError::InvalidPluginManifest {
            reason: format!("plugin id '{id}' must match {PLUGIN_ID_PATTERN} and not be empty"),
        });
    }
    Ok(())
}

/// Check that `name` is a plain file name that stays inside its install directory.
pub fn validate_file_name(name: &str) -> Result<(), UpgradeError> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if !plain {
        return Err(UpgradeError::InvalidPluginManifest {
            reason: format!("'{name}' is not a plain file name"),
        });
    }
    Ok(())
}

/// Find the plugin that owns a loaded extension.
///
/// `extension` is a dotted extension name (`cogs.bridge`). A registry record
/// named after the extension wins; otherwise every readable record is searched
/// for the module file. Unreadable records are skipped. The system record never
/// counts as an owner.
pub async fn find_owner(
    files: &impl FileTransfer,
    plugins_dir: &Path,
    extension: &str,
) -> Result<Option<PluginManifest>> {
    let stem = extension.strip_prefix("cogs.").unwrap_or(extension);
    let module = format!("{stem}.py");

    let direct = plugins_dir.join(format!("{stem}.json"));
    if files.exists(&direct).await {
        if let Ok(manifest) = read_json::<PluginManifest>(files, &direct).await {
            return Ok((manifest.id != SYSTEM_PLUGIN_ID).then_some(manifest));
        }
    }

    for path in files.list_files(plugins_dir).await? {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_json::<PluginManifest>(files, &path).await {
            Ok(manifest) if manifest.owns_module(&module) => {
                return Ok((manifest.id != SYSTEM_PLUGIN_ID).then_some(manifest));
            }
            Ok(_) => {}
            Err(e) => debug!("Skipping unreadable plugin record {}: {e:#}", path.display()),
        }
    }

    Ok(None)
}
