//! HTTP(S) and `file://` repository client.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Url;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{ArtifactFetcher, RepositoryClient, RepositoryIndex, INDEX_FILE};
use crate::config::UpdateConfig;
use crate::domain::{Artifact, ConfigError, InstallError, ResolveError};
use crate::source::RepositoryLocation;

/// Repository client over reqwest, with local-file support.
#[derive(Debug, Clone)]
pub struct RemoteRepository {
    http_client: reqwest::Client,
}

impl RemoteRepository {
    /// Build a client honouring the configured timeout and user agent.
    pub fn new(config: &UpdateConfig) -> Result<Self, ConfigError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self { http_client })
    }

    async fn read_index_bytes(
        &self,
        location: &RepositoryLocation,
    ) -> Result<Vec<u8>, ResolveError> {
        let url = location
            .join(INDEX_FILE)
            .map_err(|e| ResolveError::MalformedMetadata {
                location: location.to_string(),
                reason: e.to_string(),
            })?;
        let unreachable = |cause: String| ResolveError::Unreachable {
            location: location.to_string(),
            cause,
        };

        if location.is_file() {
            let path = file_path(&url).map_err(unreachable)?;
            debug!("Reading index from {}", path.display());
            return tokio::fs::read(&path)
                .await
                .map_err(|e| unreachable(format!("{}: {e}", path.display())));
        }

        debug!("Fetching index from {}", url);
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unreachable(format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RepositoryClient for RemoteRepository {
    async fn fetch_index(
        &self,
        location: &RepositoryLocation,
    ) -> Result<RepositoryIndex, ResolveError> {
        let bytes = self.read_index_bytes(location).await?;
        let index = RepositoryIndex::from_slice(location, &bytes)?;
        info!(
            "Loaded {} release(s) from {}",
            index.releases.len(),
            location
        );
        Ok(index)
    }
}

#[async_trait]
impl ArtifactFetcher for RemoteRepository {
    async fn fetch(&self, artifact: &Artifact, dest: &Path) -> Result<(), InstallError> {
        let download_err = |reason: String| InstallError::Download {
            url: artifact.url.clone(),
            reason,
        };
        let url = Url::parse(&artifact.url).map_err(|e| download_err(e.to_string()))?;

        if url.scheme() == "file" {
            let src = file_path(&url).map_err(download_err)?;
            tokio::fs::copy(&src, dest)
                .await
                .map_err(|e| InstallError::io(format!("copying {}", src.display()), e))?;
            return Ok(());
        }

        let mut response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| download_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Download of {} failed with HTTP {}", artifact.url, status);
            return Err(download_err(format!("HTTP {status}")));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| InstallError::io(format!("creating {}", dest.display()), e))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| download_err(e.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| InstallError::io(format!("writing {}", dest.display()), e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| InstallError::io(format!("flushing {}", dest.display()), e))?;

        debug!("Downloaded {} bytes from {}", written, artifact.url);
        Ok(())
    }
}

fn file_path(url: &Url) -> Result<PathBuf, String> {
    url.to_file_path()
        .map_err(|_| format!("{url} is not a local file path"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn file_location(dir: &Path) -> RepositoryLocation {
        let url = Url::from_directory_path(dir).unwrap();
        RepositoryLocation::parse(url.as_str()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_index_from_file_repository() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(INDEX_FILE),
            r#"{"releases":[{"version":"1.1.0","artifacts":[{"path":"app.bin"}]}]}"#,
        )
        .unwrap();

        let repo = RemoteRepository::new(&UpdateConfig::default()).unwrap();
        let index = repo.fetch_index(&file_location(dir.path())).await.unwrap();
        assert_eq!(index.releases[0].version, "1.1.0");
    }

    #[tokio::test]
    async fn test_missing_file_index_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let repo = RemoteRepository::new(&UpdateConfig::default()).unwrap();
        let err = repo
            .fetch_index(&file_location(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_fetch_file_artifact_copies_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("payload");
        std::fs::write(&src, b"new binary").unwrap();
        let dest = dir.path().join("staged");

        let artifact = Artifact {
            path: PathBuf::from("bin/app"),
            url: Url::from_file_path(&src).unwrap().to_string(),
            sha256: None,
        };
        let repo = RemoteRepository::new(&UpdateConfig::default()).unwrap();
        repo.fetch(&artifact, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"new binary");
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let mut config = UpdateConfig::default();
        config.request_timeout_ms = 2_000;
        let repo = RemoteRepository::new(&config).unwrap();
        let loc = RepositoryLocation::parse("http://127.0.0.1:9/repository").unwrap();

        let err = tokio::time::timeout(Duration::from_secs(10), repo.fetch_index(&loc))
            .await
            .expect("request must respect the configured timeout")
            .unwrap_err();
        assert!(matches!(err, ResolveError::Unreachable { .. }));
    }
}
