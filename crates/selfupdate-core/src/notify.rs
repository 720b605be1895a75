//! The notification sink consumed by the coordinator, and the translation of
//! internal errors into user-facing notices.
//!
//! Raw error causes never reach a sink. Each notice carries a diagnostic
//! reference that is logged next to the full cause.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{InstallError, JobError, ResolveError};

/// Presents update results to the user and restarts the host.
///
/// Methods may be called from worker tasks; implementations that need a
/// particular thread (a UI loop, a blocking terminal read) marshal there
/// themselves.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_no_update(&self);

    async fn notify_error(&self, notice: &UserNotice);

    /// Ask whether to restart now that updates are installed.
    async fn confirm_restart(&self) -> bool;

    async fn restart_host(&self);
}

/// A translated, user-presentable error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNotice {
    pub title: String,
    pub message: String,
    /// Diagnostic reference matching the logged cause.
    pub reference: Option<Uuid>,
}

impl UserNotice {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: Uuid) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn from_resolve_error(err: &ResolveError) -> Self {
        match err {
            ResolveError::Unreachable { .. } => Self::new(
                "Update check failed",
                "The update site could not be reached. Check your network connection and try again.",
            ),
            ResolveError::MalformedMetadata { .. } => Self::new(
                "Update check failed",
                "The update site returned information that could not be read.",
            ),
            ResolveError::InvalidLocation(_) => Self::new(
                "Update check failed",
                "The update site address is not valid. Check the configured update repositories.",
            ),
            ResolveError::Cancelled => {
                Self::new("Update cancelled", "The update check was cancelled.")
            }
        }
    }

    pub fn from_install_error(err: &InstallError) -> Self {
        let message = match err {
            InstallError::EnvironmentUnsupported { .. } => {
                "Updates cannot be installed in the current environment."
            }
            InstallError::Io { .. } => {
                "Updates could not be written to the installation directory. The current version was kept."
            }
            InstallError::Download { .. } => "An update file could not be downloaded.",
            InstallError::DigestMismatch { .. } => {
                "A downloaded update file failed its integrity check."
            }
            InstallError::Locked { .. } => {
                "Another update is being installed in the same location. Try again later."
            }
            InstallError::Cancelled => "The update was cancelled before it was applied.",
            InstallError::Unknown(_) => "The update could not be installed.",
        };
        let title = if matches!(err, InstallError::Cancelled) {
            "Update cancelled"
        } else {
            "Update failed"
        };
        Self::new(title, message)
    }

    pub fn install_cancelled() -> Self {
        Self::from_install_error(&InstallError::Cancelled)
    }

    pub fn from_job_error(_err: &JobError) -> Self {
        Self::new("Update failed", "The update process stopped unexpectedly.")
    }
}

impl std::fmt::Display for UserNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title, self.message)?;
        if let Some(reference) = self.reference {
            write!(f, " (reference {reference})")?;
        }
        Ok(())
    }
}

/// Headless sink that writes to the log and answers restart prompts with a
/// fixed policy.
#[derive(Debug, Clone, Default)]
pub struct LoggingSink {
    restart: bool,
}

impl LoggingSink {
    pub fn new(restart: bool) -> Self {
        Self { restart }
    }
}

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn notify_no_update(&self) {
        info!("No updates for the current installation have been found.");
    }

    async fn notify_error(&self, notice: &UserNotice) {
        warn!("{}", notice);
    }

    async fn confirm_restart(&self) -> bool {
        info!(restart = self.restart, "Updates have been installed");
        self.restart
    }

    async fn restart_host(&self) {
        info!("Restart requested; the host must be restarted to use the new version");
    }
}
