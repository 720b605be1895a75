//! In-memory collaborators for tests and dry runs.
//!
//! - [`MemoryRepository`]: a `RepositoryClient` + `ArtifactFetcher` backed by
//!   a map of locations to releases
//! - [`RecordingSink`]: a `NotificationSink` that counts every call
//! - [`StaticEnvironment`]: a `HostEnvironment` with a fixed answer

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;

use crate::domain::{Artifact, InstallError, ResolveError};
use crate::install::HostEnvironment;
use crate::notify::{NotificationSink, UserNotice};
use crate::repository::{
    ArtifactEntry, ArtifactFetcher, ReleaseEntry, RepositoryClient, RepositoryIndex,
};
use crate::source::RepositoryLocation;

#[derive(Debug, Clone)]
enum Behavior {
    Index(RepositoryIndex),
    Unreachable,
    Malformed,
    Hang,
    Panic,
}

#[derive(Debug, Default)]
struct RepoState {
    /// Keyed by normalized location string.
    locations: HashMap<String, Behavior>,
    /// Keyed by artifact URL.
    payloads: HashMap<String, Vec<u8>>,
    tampered: HashMap<String, Vec<u8>>,
}

/// Repository served from memory.
///
/// Artifacts are addressed by the URL the resolver derives for them, so the
/// fake exercises the same path and digest handling as a real repository.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    state: Arc<Mutex<RepoState>>,
    hang_downloads: Arc<AtomicBool>,
    index_gate: Option<Arc<Semaphore>>,
    index_calls: Arc<AtomicUsize>,
    fetch_calls: Arc<AtomicUsize>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RepoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `version` at `location` with the given `(path, contents)`
    /// files. Digests are computed from the contents.
    pub fn with_release(self, location: &str, version: &str, files: &[(&str, &[u8])]) -> Self {
        let loc = normalize(location);
        {
            let mut state = self.lock();
            let mut artifacts = Vec::with_capacity(files.len());
            for (path, contents) in files {
                let url = join_url(&loc, &format!("{version}/{path}"));
                state.payloads.insert(url, contents.to_vec());
                artifacts.push(ArtifactEntry {
                    path: (*path).to_string(),
                    url: None,
                    sha256: Some(hex::encode(Sha256::digest(contents))),
                });
            }
            let release = ReleaseEntry {
                version: version.to_string(),
                notes: None,
                artifacts,
            };
            let entry = state
                .locations
                .entry(loc)
                .or_insert_with(|| Behavior::Index(RepositoryIndex::default()));
            match entry {
                Behavior::Index(index) => index.releases.push(release),
                other => *other = Behavior::Index(RepositoryIndex {
                    releases: vec![release],
                }),
            }
        }
        self
    }

    /// A location that serves an index with no releases.
    pub fn with_empty(self, location: &str) -> Self {
        self.set(location, Behavior::Index(RepositoryIndex::default()))
    }

    pub fn with_unreachable(self, location: &str) -> Self {
        self.set(location, Behavior::Unreachable)
    }

    pub fn with_malformed(self, location: &str) -> Self {
        self.set(location, Behavior::Malformed)
    }

    /// Index requests to `location` never complete.
    pub fn with_hanging(self, location: &str) -> Self {
        self.set(location, Behavior::Hang)
    }

    /// Index requests panic inside the resolver.
    pub fn with_panicking(self, location: &str) -> Self {
        self.set(location, Behavior::Panic)
    }

    /// Every index request waits for a [`release_index`](Self::release_index).
    pub fn gate_index(mut self) -> Self {
        self.index_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let one gated index request through.
    pub fn release_index(&self) {
        if let Some(gate) = &self.index_gate {
            gate.add_permits(1);
        }
    }

    /// Artifact downloads never complete.
    pub fn hang_downloads(self) -> Self {
        self.hang_downloads.store(true, Ordering::SeqCst);
        self
    }

    /// Serve `contents` for the artifact instead of what was published,
    /// keeping the published digest.
    pub fn with_tampered(self, location: &str, version: &str, path: &str, contents: &[u8]) -> Self {
        let url = join_url(&normalize(location), &format!("{version}/{path}"));
        self.lock().tampered.insert(url, contents.to_vec());
        self
    }

    pub fn index_calls(&self) -> usize {
        self.index_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn set(self, location: &str, behavior: Behavior) -> Self {
        self.lock().locations.insert(normalize(location), behavior);
        self
    }
}

#[async_trait]
impl RepositoryClient for MemoryRepository {
    async fn fetch_index(
        &self,
        location: &RepositoryLocation,
    ) -> Result<RepositoryIndex, ResolveError> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.index_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let behavior = self.lock().locations.get(location.as_str()).cloned();
        match behavior {
            Some(Behavior::Index(index)) => Ok(index),
            Some(Behavior::Malformed) => Err(ResolveError::MalformedMetadata {
                location: location.to_string(),
                reason: "expected value at line 1 column 1".to_string(),
            }),
            Some(Behavior::Hang) => std::future::pending().await,
            Some(Behavior::Panic) => panic!("index handler for {location} panicked"),
            Some(Behavior::Unreachable) | None => Err(ResolveError::Unreachable {
                location: location.to_string(),
                cause: "connection refused".to_string(),
            }),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for MemoryRepository {
    async fn fetch(&self, artifact: &Artifact, dest: &Path) -> Result<(), InstallError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_downloads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let bytes = {
            let state = self.lock();
            state
                .tampered
                .get(&artifact.url)
                .or_else(|| state.payloads.get(&artifact.url))
                .cloned()
        };
        let bytes = bytes.ok_or_else(|| InstallError::Download {
            url: artifact.url.clone(),
            reason: "404 Not Found".to_string(),
        })?;
        tokio::fs::write(dest, bytes)
            .await
            .map_err(|e| InstallError::io(format!("writing {}", dest.display()), e))
    }
}

fn normalize(location: &str) -> String {
    match RepositoryLocation::parse(location) {
        Ok(loc) => loc.as_str().to_string(),
        Err(_) => location.to_string(),
    }
}

fn join_url(base: &str, relative: &str) -> String {
    match RepositoryLocation::parse(base).and_then(|loc| loc.join(relative)) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{base}{relative}"),
    }
}

/// Sink that records what the coordinator asked for.
#[derive(Debug, Default)]
pub struct RecordingSink {
    confirm: bool,
    no_update: AtomicUsize,
    confirms: AtomicUsize,
    restarts: AtomicUsize,
    errors: Mutex<Vec<UserNotice>>,
}

impl RecordingSink {
    /// `confirm` is the answer given to every restart prompt.
    pub fn new(confirm: bool) -> Self {
        Self {
            confirm,
            ..Self::default()
        }
    }

    pub fn no_update_count(&self) -> usize {
        self.no_update.load(Ordering::SeqCst)
    }

    pub fn confirm_count(&self) -> usize {
        self.confirms.load(Ordering::SeqCst)
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> Vec<UserNotice> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify_no_update(&self) {
        self.no_update.fetch_add(1, Ordering::SeqCst);
    }

    async fn notify_error(&self, notice: &UserNotice) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice.clone());
    }

    async fn confirm_restart(&self) -> bool {
        self.confirms.fetch_add(1, Ordering::SeqCst);
        self.confirm
    }

    async fn restart_host(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Host environment with a fixed verdict.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    unsupported: Option<String>,
}

impl StaticEnvironment {
    pub fn supported() -> Self {
        Self::default()
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            unsupported: Some(reason.into()),
        }
    }
}

impl HostEnvironment for StaticEnvironment {
    fn check(&self, _install_root: &Path) -> Result<(), String> {
        match &self.unsupported {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }
}
