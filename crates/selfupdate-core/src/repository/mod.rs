//! Repository access traits and the index document they exchange.
//!
//! - `RepositoryClient`: fetch the release index of a location
//! - `ArtifactFetcher`: download one artifact to a local path
//!
//! Both are async and transport-agnostic. [`remote::RemoteRepository`]
//! implements them over HTTP(S) and `file://`; in-memory fakes live in
//! [`crate::fakes`].

pub mod remote;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Artifact, InstallError, ResolveError};
use crate::source::RepositoryLocation;

pub use remote::RemoteRepository;

/// File name of the index document under a repository location.
pub const INDEX_FILE: &str = "index.json";

/// Release index published by a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryIndex {
    #[serde(default)]
    pub releases: Vec<ReleaseEntry>,
}

/// One published release, as written in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEntry {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactEntry>,
}

/// One artifact of a release, as written in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Destination relative to the install root.
    pub path: String,
    /// Download URL, absolute or relative to the repository location.
    /// Defaults to `<version>/<path>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl RepositoryIndex {
    pub fn from_slice(location: &RepositoryLocation, bytes: &[u8]) -> Result<Self, ResolveError> {
        serde_json::from_slice(bytes).map_err(|e| ResolveError::MalformedMetadata {
            location: location.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Reads release indexes from repositories.
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Fetch and parse the index of `location`.
    async fn fetch_index(
        &self,
        location: &RepositoryLocation,
    ) -> Result<RepositoryIndex, ResolveError>;
}

/// Downloads artifacts.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Write the artifact bytes to `dest`, creating or truncating it.
    async fn fetch(&self, artifact: &Artifact, dest: &Path) -> Result<(), InstallError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_parses_minimal_document() {
        let loc = RepositoryLocation::parse("https://updates.example.com").unwrap();
        let index = RepositoryIndex::from_slice(
            &loc,
            br#"{"releases":[{"version":"2.0.0","artifacts":[{"path":"bin/app"}]}]}"#,
        )
        .unwrap();
        assert_eq!(index.releases.len(), 1);
        assert_eq!(index.releases[0].artifacts[0].path, "bin/app");
        assert!(index.releases[0].artifacts[0].url.is_none());
    }

    #[test]
    fn test_index_garbage_is_malformed() {
        let loc = RepositoryLocation::parse("https://updates.example.com").unwrap();
        let err = RepositoryIndex::from_slice(&loc, b"<html>not json</html>").unwrap_err();
        assert!(matches!(err, ResolveError::MalformedMetadata { .. }));
    }

    #[test]
    fn test_empty_object_is_empty_index() {
        let loc = RepositoryLocation::parse("file:///srv/repo").unwrap();
        let index = RepositoryIndex::from_slice(&loc, b"{}").unwrap();
        assert!(index.releases.is_empty());
    }
}
