//! Results produced by resolution, installation, and whole check cycles.

use std::error::Error as StdError;
use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};

use super::error::{InstallError, ResolveError};
use super::plan::UpdatePlan;

/// Outcome of a single resolution attempt.
#[derive(Debug)]
pub enum ResolutionResult {
    NoUpdateAvailable,
    UpdateFound(UpdatePlan),
    ResolutionFailed(ResolveError),
}

impl ResolutionResult {
    pub fn is_update_found(&self) -> bool {
        matches!(self, ResolutionResult::UpdateFound(_))
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            ResolutionResult::NoUpdateAvailable => "no_update",
            ResolutionResult::UpdateFound(_) => "update_found",
            ResolutionResult::ResolutionFailed(_) => "failed",
        }
    }
}

/// Outcome of a single install attempt.
#[derive(Debug)]
pub enum InstallOutcome {
    Installed { version: Version },
    InstallFailed(InstallError),
    Cancelled,
}

impl InstallOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, InstallOutcome::Installed { .. })
    }

    /// Human-readable summary of the outcome.
    pub fn message(&self) -> Option<String> {
        match self {
            InstallOutcome::Installed { version } => Some(format!("installed version {version}")),
            InstallOutcome::InstallFailed(err) => Some(err.to_string()),
            InstallOutcome::Cancelled => Some("install cancelled".to_string()),
        }
    }

    /// Underlying cause of a failure, if any.
    pub fn cause(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            InstallOutcome::InstallFailed(err) => Some(err),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            InstallOutcome::Installed { .. } => "installed",
            InstallOutcome::InstallFailed(_) => "failed",
            InstallOutcome::Cancelled => "cancelled",
        }
    }
}

/// Terminal status of a whole `check_for_updates` cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Cancelled,
    NoUpdateAvailable,
    ResolutionError,
    InstallSucceeded,
    InstallFailed,
}

impl CheckStatus {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            CheckStatus::NoUpdateAvailable | CheckStatus::InstallSucceeded
        )
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Cancelled => "cancelled",
            CheckStatus::NoUpdateAvailable => "no_update_available",
            CheckStatus::ResolutionError => "resolution_error",
            CheckStatus::InstallSucceeded => "install_succeeded",
            CheckStatus::InstallFailed => "install_failed",
        };
        write!(f, "{s}")
    }
}
