//! Custom emoji packs shipped by plugins.
//!
//! A pack maps emoji names to `[value, version]` pairs. In a freshly fetched
//! pack the value is an image file name relative to the plugin's `emojis/`
//! directory; once installed it is the rendered reference the chat platform
//! understands (`<:name:id>` or `<a:name:id>` for animated emojis).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::plugin::validate_file_name;
use crate::core::UpgradeError;

/// One emoji of a pack: its value and per-item version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiEntry(pub String, pub i64);

impl EmojiEntry {
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub const fn version(&self) -> i64 {
        self.1
    }

    /// Platform id of the live custom emoji, when the value is a rendered reference.
    #[must_use]
    pub fn custom_emoji_id(&self) -> Option<u64> {
        parse_custom_emoji_id(&self.0)
    }
}

/// An emoji pack record (`emoji.json` in a plugin, `emojis/<id>.json` once installed).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmojiPack {
    pub emojis: BTreeMap<String, EmojiEntry>,
    #[serde(default)]
    pub installed: bool,
    /// Owning plugin, only set on the active pack record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EmojiPack {
    /// Check that every value of a freshly fetched pack is a plain image file name.
    pub fn validate_sources(&self) -> Result<(), UpgradeError> {
        self.emojis.values().try_for_each(|entry| validate_file_name(entry.value()))
    }
}

/// A custom emoji that exists on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomEmoji {
    pub name: String,
    pub id: u64,
    pub animated: bool,
}

impl CustomEmoji {
    /// Render the reference stored in installed packs.
    #[must_use]
    pub fn render(&self) -> String {
        if self.animated {
            format!("<a:{}:{}>", self.name, self.id)
        } else {
            format!("<:{}:{}>", self.name, self.id)
        }
    }
}

/// Extract the id from `<:name:id>` / `<a:name:id>`.
#[must_use]
pub fn parse_custom_emoji_id(value: &str) -> Option<u64> {
    if !(value.starts_with("<:") || value.starts_with("<a:")) || !value.ends_with('>') {
        return None;
    }
    value.split(':').nth(2)?.trim_end_matches('>').parse().ok()
}

/// What has to happen to move from an installed pack to a new one.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EmojiPlan {
    /// Live custom emoji ids to delete before uploading replacements.
    pub remove: Vec<u64>,
    /// Emoji names to upload from the new pack.
    pub upload: Vec<String>,
    /// Emoji names whose installed reference is carried over.
    pub keep: Vec<String>,
}

/// Compare an installed pack with a new one.
///
/// An installed emoji is replaced only when the new pack's per-item version is
/// strictly greater. An emoji that disappeared from the new pack is removed
/// without a replacement. Emojis the installed pack does not know are uploaded.
#[must_use]
pub fn plan_replacement(installed: Option<&EmojiPack>, new: &EmojiPack) -> EmojiPlan {
    let mut plan = EmojiPlan::default();
    let mut replace = Vec::new();

    if let Some(installed) = installed {
        for (name, old) in &installed.emojis {
            let outdated = new.emojis.get(name).is_none_or(|entry| old.version() < entry.version());
            if !outdated {
                continue;
            }
            if let Some(id) = old.custom_emoji_id() {
                plan.remove.push(id);
            }
            if new.emojis.contains_key(name) {
                replace.push(name.as_str());
            }
        }
    }

    for name in new.emojis.keys() {
        let known = installed.is_some_and(|pack| pack.emojis.contains_key(name));
        if !known || replace.contains(&name.as_str()) {
            plan.upload.push(name.clone());
        } else {
            plan.keep.push(name.clone());
        }
    }

    plan
}
