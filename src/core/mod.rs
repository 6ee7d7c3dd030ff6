//! Core types shared by every part of the updater.
//!
//! - [`UpdateError`] - the failure taxonomy of the update pipeline
//! - [`RollbackStatus`] - what state a failed executable swap left behind
//! - [`ErrorContext`] / [`user_friendly_error`] - CLI-facing error rendering

pub mod error;

pub use error::{ErrorContext, RollbackStatus, UpdateError, user_friendly_error};
