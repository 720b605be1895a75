//! Resolved update plans.

use std::fmt;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::source::RepositoryLocation;

/// A single file delivered by a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Destination path relative to the install root.
    pub path: PathBuf,
    /// Absolute download URL.
    pub url: String,
    /// Expected SHA-256 (lowercase hex), when the repository publishes one.
    pub sha256: Option<String>,
}

/// A resolved delta from the installed version to a newer one.
///
/// Only the resolver constructs plans, and a plan is moved into the
/// executor, so each plan is installed at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct UpdatePlan {
    current: Version,
    target: Version,
    artifacts: Vec<Artifact>,
    source: RepositoryLocation,
    notes: Option<String>,
}

impl UpdatePlan {
    pub(crate) fn new(
        current: Version,
        target: Version,
        artifacts: Vec<Artifact>,
        source: RepositoryLocation,
        notes: Option<String>,
    ) -> Self {
        Self {
            current,
            target,
            artifacts,
            source,
            notes,
        }
    }

    pub fn current(&self) -> &Version {
        &self.current
    }

    pub fn target(&self) -> &Version {
        &self.target
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Repository the target release was found in.
    pub fn source(&self) -> &RepositoryLocation {
        &self.source
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Whether an artifact writes to `path` (relative to the install root).
    pub fn touches(&self, path: &Path) -> bool {
        self.artifacts.iter().any(|a| a.path == path)
    }
}

impl fmt::Display for UpdatePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({} artifact(s) from {})",
            self.current,
            self.target,
            self.artifacts.len(),
            self.source
        )
    }
}
