//! Error taxonomy for the update workflow.

use std::path::PathBuf;

/// A repository location string failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid repository location '{location}': {reason}")]
pub struct InvalidLocation {
    pub location: String,
    pub reason: String,
}

impl InvalidLocation {
    pub fn new(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

/// Reasons a resolution attempt can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("repository {location} is unreachable: {cause}")]
    Unreachable { location: String, cause: String },

    #[error("malformed metadata in repository {location}: {reason}")]
    MalformedMetadata { location: String, reason: String },

    #[error("resolution cancelled")]
    Cancelled,

    #[error(transparent)]
    InvalidLocation(#[from] InvalidLocation),
}

impl ResolveError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResolveError::Cancelled)
    }
}

/// Reasons an install attempt can fail.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// The host cannot legally modify itself in the current context.
    #[error("self-update is not supported in this environment: {reason}")]
    EnvironmentUnsupported { reason: String },

    #[error("io error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("another install holds {}", path.display())]
    Locked { path: PathBuf },

    #[error("install cancelled")]
    Cancelled,

    #[error("install failed: {0}")]
    Unknown(String),
}

impl InstallError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        InstallError::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether a later check cycle may retry after this failure.
    ///
    /// `EnvironmentUnsupported` will fail the same way until the host changes.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, InstallError::EnvironmentUnsupported { .. })
    }
}

/// Errors surfaced by a background job itself rather than its work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("job '{name}' panicked: {message}")]
    Panicked { name: String, message: String },

    #[error("job '{name}' ended without reporting an outcome")]
    Lost { name: String },
}

/// Errors returned by the coordinator's public API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("an update check is already in progress")]
    CheckInProgress,

    #[error("update coordinator has shut down")]
    Closed,
}

/// Errors loading or validating [`crate::UpdateConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid current version '{value}': {source}")]
    InvalidVersion {
        value: String,
        #[source]
        source: semver::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_location_display() {
        let err = InvalidLocation::new("ht!tp://", "relative URL without a base");
        let msg = err.to_string();
        assert!(msg.contains("ht!tp://"));
        assert!(msg.contains("relative URL"));
    }

    #[test]
    fn test_resolve_error_display() {
        let err = ResolveError::Unreachable {
            location: "https://updates.example.com".to_string(),
            cause: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("unreachable"));
        assert!(!err.is_cancelled());
        assert!(ResolveError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_environment_unsupported_is_not_retriable() {
        let err = InstallError::EnvironmentUnsupported {
            reason: "running from a build tree".to_string(),
        };
        assert!(!err.is_retriable());

        let err = InstallError::io(
            "writing journal",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.is_retriable());
        assert!(err.to_string().contains("writing journal"));
        assert!(InstallError::Cancelled.is_retriable());
    }

    #[test]
    fn test_digest_mismatch_error() {
        let err = InstallError::DigestMismatch {
            path: PathBuf::from("bin/app"),
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }
}
