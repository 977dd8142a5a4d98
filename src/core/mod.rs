//! Core types shared by every botup module.
//!
//! Currently this is the error taxonomy and the user-facing error display.

pub mod error;

pub use error::{ErrorContext, UpgradeError, user_friendly_error};
