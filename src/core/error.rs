//! Error handling for the updater.
//!
//! [`UpdateError`] is the strongly-typed taxonomy used by every component of
//! the update pipeline. Workers never let one of these escape as a panic: they
//! are converted into [`UpdateOutcome`](crate::upgrade::UpdateOutcome) values
//! at the worker boundary and delivered to the coordinator as messages.
//!
//! For the command-line surface, [`user_friendly_error`] turns any
//! `anyhow::Error` into an [`ErrorContext`] carrying a suggestion the user can
//! act on.

use colored::Colorize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result of attempting to put the original executable back after a failed
/// replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackStatus {
    /// The failure happened before the original executable was moved.
    NotAttempted,
    /// The original executable was moved back into place.
    Restored,
    /// The original executable could not be moved back; it is still at
    /// `backup_path` and must be restored by hand.
    Failed {
        backup_path: PathBuf,
        reason: String,
    },
}

impl RollbackStatus {
    /// Whether the installation is left in a working state.
    #[must_use]
    pub const fn installation_intact(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAttempted => write!(f, "original executable untouched"),
            Self::Restored => write!(f, "rollback succeeded, original executable restored"),
            Self::Failed {
                backup_path,
                reason,
            } => write!(
                f,
                "rollback failed: {reason}; restore manually from {}",
                backup_path.display()
            ),
        }
    }
}

/// Every failure mode of the self-update pipeline.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// The manifest URL is unset or still carries a template token.
    #[error("Update manifest URL is not configured: {url}")]
    NotConfigured {
        url: String,
    },

    #[error("Network error while {operation}: {reason}")]
    Network {
        operation: String,
        reason: String,
    },

    #[error("Timed out while {operation}")]
    Timeout {
        operation: String,
    },

    #[error("Server returned HTTP {status} for {url}")]
    HttpStatus {
        url: String,
        status: u16,
    },

    #[error("Malformed update manifest: {reason}")]
    MalformedManifest {
        reason: String,
    },

    #[error("Invalid version '{version}': {reason}")]
    VersionParse {
        version: String,
        reason: String,
    },

    #[error("Failed to {operation} {}: {source}", .path.display())]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Swapping the executable failed. `rollback` says what state the
    /// installation was left in.
    #[error("Failed to replace executable: {reason} ({rollback})")]
    Replace {
        reason: String,
        rollback: RollbackStatus,
    },

    #[error("Failed to launch {}: {reason}", .path.display())]
    SpawnFailed {
        path: PathBuf,
        reason: String,
    },

    #[error("{operation} is already in progress")]
    AlreadyInProgress {
        operation: String,
    },

    /// A background worker died without reporting a result.
    #[error("Background {operation} task failed: {reason}")]
    Worker {
        operation: String,
        reason: String,
    },

    #[error("No update is available to download")]
    NothingToDownload,

    #[error("Download cancelled")]
    Cancelled,

    #[error("Update coordinator is no longer running")]
    ShutDown,
}

impl UpdateError {
    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Classify a `reqwest` failure into timeout, status, or generic network errors.
    pub fn from_reqwest(operation: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout {
                operation: operation.to_string(),
            };
        }
        if let Some(status) = error.status() {
            return Self::HttpStatus {
                url: error.url().map(ToString::to_string).unwrap_or_default(),
                status: status.as_u16(),
            };
        }
        Self::Network {
            operation: operation.to_string(),
            reason: error.to_string(),
        }
    }

    /// Errors the user has to resolve by hand: a rollback that could not put
    /// the original executable back, or a replaced binary that could not be
    /// launched.
    #[must_use]
    pub const fn requires_user_action(&self) -> bool {
        match self {
            Self::Replace { rollback, .. } => !rollback.installation_intact(),
            Self::SpawnFailed { .. } => true,
            _ => false,
        }
    }

    /// Transient failures that are worth trying again on the next cycle.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// An error paired with optional details and a suggestion for the user.
#[derive(Debug)]
pub struct ErrorContext {
    pub message: String,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl ErrorContext {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            details: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print to stderr with colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.message);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with a suggestion where one is known.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let update_error = error.chain().find_map(|cause| {
        cause
            .downcast_ref::<UpdateError>()
            .or_else(|| cause.downcast_ref::<Arc<UpdateError>>().map(|shared| &**shared))
    });
    if let Some(update_error) = update_error {
        return create_error_context(update_error);
    }

    let permission_denied = error
        .downcast_ref::<std::io::Error>()
        .is_some_and(|io_error| io_error.kind() == std::io::ErrorKind::PermissionDenied);
    if permission_denied {
        return ErrorContext::new(format!("{error:#}"))
            .with_suggestion("Check that you have write access to the application directory");
    }

    ErrorContext::new(format!("{error:#}"))
}

fn create_error_context(error: &UpdateError) -> ErrorContext {
    let context = ErrorContext::new(error.to_string());
    match error {
        UpdateError::NotConfigured { .. } => context
            .with_suggestion("Set `manifest_url` in updater.toml or pass --manifest-url")
            .with_details("This build still ships the template manifest URL"),
        UpdateError::Network { .. } | UpdateError::Timeout { .. } => context
            .with_suggestion("Check your internet connection and try again"),
        UpdateError::HttpStatus { status, .. } if *status >= 500 => {
            context.with_suggestion("The update server is having trouble; try again later")
        }
        UpdateError::MalformedManifest { .. } | UpdateError::VersionParse { .. } => context
            .with_suggestion("The published update information is invalid; contact support"),
        UpdateError::Replace {
            rollback: RollbackStatus::Failed { backup_path, .. },
            ..
        } => context
            .with_suggestion(format!(
                "Rename {} back to the original executable name to restore the previous version",
                backup_path.display()
            ))
            .with_details("The executable could not be replaced and automatic rollback failed"),
        UpdateError::Replace { .. } => context
            .with_details("Your current installation was left unchanged"),
        UpdateError::NothingToDownload => {
            context.with_suggestion("Run `easylaw-updater check` to look for a new version first")
        }
        UpdateError::SpawnFailed { path, .. } => context.with_suggestion(format!(
            "The update was installed; start {} manually",
            path.display()
        )),
        UpdateError::Io { source, .. }
            if source.kind() == std::io::ErrorKind::PermissionDenied =>
        {
            context.with_suggestion(
                "Check that you have write access to the application directory",
            )
        }
        _ => context,
    }
}
