//! Upgrade candidate resolution.
//!
//! Given the installed [`CurrentState`] and the [`RemoteManifest`] published by
//! the remote, [`VersionResolver`] decides which versions the operator may pick
//! from:
//!
//! - the **head release**, when its release counter is newer than the installed
//!   one (or the upgrade is forced)
//! - every **legacy range** whose `[lower, upper]` window contains the installed
//!   release and whose legacy counter is newer than the installed legacy
//!   counter (or the upgrade is forced)
//!
//! Candidates are ordered head first, then legacy ranges in manifest order. An
//! empty list means the installation is up to date.

use tracing::debug;

use crate::manifest::{CurrentState, ReleaseDescriptor, RemoteManifest};

/// Computes applicable upgrade candidates.
#[derive(Debug, Default, Clone, Copy)]
pub struct VersionResolver {
    force: bool,
}

impl VersionResolver {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            force: false,
        }
    }

    /// Offer candidates even when they are not newer than what is installed.
    ///
    /// Legacy ranges still have to contain the installed release.
    #[must_use]
    pub const fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Resolve the ordered candidate list.
    #[must_use]
    pub fn resolve(&self, current: &CurrentState, manifest: &RemoteManifest) -> Vec<ReleaseDescriptor> {
        let mut candidates = Vec::new();

        if manifest.release > current.release || self.force {
            candidates.push(ReleaseDescriptor {
                version: manifest.version.clone(),
                release: manifest.release,
                legacy_index: None,
                reboot: manifest.reboot,
            });
        }

        let installed_legacy = current.legacy_or_default();
        for (index, range) in manifest.legacy.iter().enumerate() {
            if !range.covers(current.release) {
                continue;
            }
            if range.release > installed_legacy || self.force {
                candidates.push(ReleaseDescriptor {
                    version: range.version.clone(),
                    release: range.release,
                    legacy_index: Some(index),
                    reboot: range.reboot,
                });
            }
        }

        debug!(
            "Resolved {} candidate(s) for release {} (legacy {:?}, force: {})",
            candidates.len(),
            current.release,
            current.legacy,
            self.force
        );
        candidates
    }
}
