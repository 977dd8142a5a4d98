//! Shared helpers.
//!
//! - [`fs`] - the production [`FileTransfer`](crate::host::FileTransfer), JSON records and digests
//! - [`progress`] - terminal spinner used while long steps run

pub mod fs;
pub mod progress;

pub use fs::{LocalFileTransfer, read_json, sha256_hex, write_json};
