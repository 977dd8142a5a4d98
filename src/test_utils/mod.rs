//! Test utilities for botup
//!
//! Fakes for every collaborator trait plus helpers to lay out an installation
//! in a temporary directory:
//!
//! - [`ScriptedOperator`] replays a fixed list of interactions and records views
//! - [`RecordingHost`] records reloads, reboot flags and emoji operations
//! - [`FakeSource`] materializes fixture trees instead of cloning
//! - [`FakeInstaller`] records package installs and returns a fixed status
//! - [`FailingFiles`] wraps the local file transfer and fails chosen paths

mod fakes;

pub use fakes::{FailingFiles, FakeInstaller, FakeSource, RecordingHost, ScriptedOperator, SESSION, Tree};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`; without either nothing is logged.
///
/// ```bash
/// RUST_LOG=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
