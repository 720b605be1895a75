//! Update resolution: find the newest release strictly newer than the
//! installed version across all configured repositories.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use semver::Version;
use tracing::{debug, info, warn};

use crate::domain::{Artifact, ResolutionResult, ResolveError, UpdatePlan};
use crate::job::{JobContext, JobHandle};
use crate::repository::{ReleaseEntry, RepositoryClient};
use crate::source::RepositoryLocation;

/// A release that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub version: Version,
    pub artifacts: Vec<Artifact>,
    pub notes: Option<String>,
    pub source: RepositoryLocation,
}

/// Pick the newest version strictly newer than `current`.
///
/// Versions compare by SemVer precedence, so build metadata never makes a
/// release newer. Among versions of equal precedence the earliest one wins.
pub fn newest_candidate<'a, I>(current: &Version, candidates: I) -> Option<&'a Version>
where
    I: IntoIterator<Item = &'a Version>,
{
    let mut best: Option<&Version> = None;
    for version in candidates {
        if version.cmp_precedence(current) != Ordering::Greater {
            continue;
        }
        if best.map_or(true, |b| version.cmp_precedence(b) == Ordering::Greater) {
            best = Some(version);
        }
    }
    best
}

/// Resolves update plans through a [`RepositoryClient`].
#[derive(Clone)]
pub struct UpdateResolver {
    client: Arc<dyn RepositoryClient>,
    include_prerelease: bool,
}

impl UpdateResolver {
    pub fn new(client: Arc<dyn RepositoryClient>) -> Self {
        Self {
            client,
            include_prerelease: false,
        }
    }

    pub fn with_prerelease(mut self, include: bool) -> Self {
        self.include_prerelease = include;
        self
    }

    /// Run [`resolve`](Self::resolve) as a background job.
    pub fn spawn(
        &self,
        current: Version,
        sources: Vec<RepositoryLocation>,
    ) -> JobHandle<ResolutionResult> {
        let resolver = self.clone();
        JobHandle::spawn("resolve-updates", move |ctx| async move {
            resolver.resolve(&current, &sources, &ctx).await
        })
    }

    /// Query every source and decide whether an update exists.
    ///
    /// Any unreachable source or malformed index fails the whole resolution.
    pub async fn resolve(
        &self,
        current: &Version,
        sources: &[RepositoryLocation],
        ctx: &JobContext,
    ) -> ResolutionResult {
        match self.collect_best(current, sources, ctx).await {
            Ok(Some(best)) => {
                info!(
                    "Update available: {} -> {} from {}",
                    current, best.version, best.source
                );
                ResolutionResult::UpdateFound(UpdatePlan::new(
                    current.clone(),
                    best.version,
                    best.artifacts,
                    best.source,
                    best.notes,
                ))
            }
            Ok(None) => {
                info!("No update newer than {} in {} source(s)", current, sources.len());
                ResolutionResult::NoUpdateAvailable
            }
            Err(e) => {
                warn!("Resolution failed: {}", e);
                ResolutionResult::ResolutionFailed(e)
            }
        }
    }

    async fn collect_best(
        &self,
        current: &Version,
        sources: &[RepositoryLocation],
        ctx: &JobContext,
    ) -> Result<Option<Candidate>, ResolveError> {
        let total = sources.len() as u64;
        let mut candidates: Vec<Candidate> = Vec::new();

        for (i, location) in sources.iter().enumerate() {
            ctx.report("resolving", i as u64, Some(total));
            debug!("Querying repository {}", location);

            let index = ctx
                .run_cancellable(self.client.fetch_index(location))
                .await
                .ok_or(ResolveError::Cancelled)??;

            for release in &index.releases {
                let candidate = parse_release(location, release)?;
                if candidate.version.pre.is_empty() || self.include_prerelease {
                    candidates.push(candidate);
                } else {
                    debug!("Skipping pre-release {} from {}", candidate.version, location);
                }
            }
        }

        ctx.report("resolving", total, Some(total));
        if ctx.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        let newest = newest_candidate(current, candidates.iter().map(|c| &c.version)).cloned();
        // `find` keeps the first source listed when several publish the same version.
        Ok(newest.and_then(|version| {
            candidates
                .into_iter()
                .find(|c| c.version.cmp_precedence(&version) == Ordering::Equal)
        }))
    }
}

fn parse_release(
    location: &RepositoryLocation,
    release: &ReleaseEntry,
) -> Result<Candidate, ResolveError> {
    let malformed = |reason: String| ResolveError::MalformedMetadata {
        location: location.to_string(),
        reason,
    };

    let raw = release.version.trim();
    let version = Version::parse(raw.strip_prefix('v').unwrap_or(raw))
        .map_err(|e| malformed(format!("invalid version '{}': {e}", release.version)))?;

    if release.artifacts.is_empty() {
        return Err(malformed(format!("release {version} has no artifacts")));
    }

    let mut seen = HashSet::new();
    let mut artifacts = Vec::with_capacity(release.artifacts.len());
    for entry in &release.artifacts {
        let path = artifact_path(&entry.path).map_err(|reason| {
            malformed(format!("release {version} artifact '{}': {reason}", entry.path))
        })?;
        if !seen.insert(path.clone()) {
            return Err(malformed(format!(
                "release {version} lists '{}' twice",
                entry.path
            )));
        }

        let relative = entry
            .url
            .clone()
            .unwrap_or_else(|| format!("{version}/{}", entry.path));
        let url = location
            .join(&relative)
            .map_err(|e| malformed(format!("release {version}: {e}")))?;

        let sha256 = match &entry.sha256 {
            Some(digest) if digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()) => {
                Some(digest.to_ascii_lowercase())
            }
            Some(digest) => {
                return Err(malformed(format!(
                    "release {version} artifact '{}': invalid sha256 '{digest}'",
                    entry.path
                )))
            }
            None => None,
        };

        artifacts.push(Artifact {
            path,
            url: url.to_string(),
            sha256,
        });
    }

    Ok(Candidate {
        version,
        artifacts,
        notes: release.notes.clone(),
        source: location.clone(),
    })
}

/// Artifact destinations must stay inside the install root.
fn artifact_path(raw: &str) -> Result<PathBuf, &'static str> {
    let path = Path::new(raw);
    if raw.trim().is_empty() {
        return Err("empty path");
    }
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err("path escapes the install root"),
            Component::RootDir | Component::Prefix(_) => return Err("path must be relative"),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err("empty path");
    }
    if clean.starts_with(crate::install::STATE_DIR) {
        return Err("path targets the updater's own state directory");
    }
    Ok(clean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::ArtifactEntry;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn location() -> RepositoryLocation {
        RepositoryLocation::parse("https://updates.example.com/stable").unwrap()
    }

    fn release(version: &str, paths: &[&str]) -> ReleaseEntry {
        ReleaseEntry {
            version: version.to_string(),
            notes: None,
            artifacts: paths
                .iter()
                .map(|p| ArtifactEntry {
                    path: p.to_string(),
                    url: None,
                    sha256: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_newest_candidate_requires_strictly_newer() {
        let current = v("1.0.0");
        let versions = [v("0.9.0"), v("1.0.0")];
        assert_eq!(newest_candidate(&current, versions.iter()), None);

        let versions = [v("1.0.1"), v("2.0.0"), v("1.5.0")];
        assert_eq!(newest_candidate(&current, versions.iter()), Some(&v("2.0.0")));
    }

    #[test]
    fn test_newest_candidate_orders_prerelease_below_release() {
        let current = v("1.0.0");
        let versions = [v("2.0.0-rc.1"), v("2.0.0")];
        assert_eq!(newest_candidate(&current, versions.iter()), Some(&v("2.0.0")));
        let versions = [v("2.0.0-rc.1")];
        assert_eq!(
            newest_candidate(&current, versions.iter()),
            Some(&v("2.0.0-rc.1"))
        );
    }

    #[test]
    fn test_newest_candidate_ignores_build_metadata() {
        let current = v("1.0.0");
        let versions = [v("1.0.0+build.2")];
        assert_eq!(newest_candidate(&current, versions.iter()), None);

        let versions = [v("1.1.0+build.1"), v("1.1.0+build.9")];
        assert_eq!(
            newest_candidate(&current, versions.iter()),
            Some(&v("1.1.0+build.1"))
        );
    }

    #[test]
    fn test_parse_release_defaults_url_under_version() {
        let candidate = parse_release(&location(), &release("2.0.0", &["bin/app"])).unwrap();
        assert_eq!(candidate.version, v("2.0.0"));
        assert_eq!(
            candidate.artifacts[0].url,
            "https://updates.example.com/stable/2.0.0/bin/app"
        );
        assert_eq!(candidate.artifacts[0].path, PathBuf::from("bin/app"));
    }

    #[test]
    fn test_parse_release_accepts_v_prefix() {
        let candidate = parse_release(&location(), &release("v3.1.0", &["app"])).unwrap();
        assert_eq!(candidate.version, v("3.1.0"));
    }

    #[test]
    fn test_parse_release_rejects_bad_metadata() {
        let cases = vec![
            release("two", &["app"]),
            release("2.0.0", &[]),
            release("2.0.0", &["../outside"]),
            release("2.0.0", &["/etc/passwd"]),
            release("2.0.0", &["app", "./app"]),
            release("2.0.0", &[".selfupdate/journal.json"]),
        ];
        for entry in cases {
            let err = parse_release(&location(), &entry).unwrap_err();
            assert!(
                matches!(err, ResolveError::MalformedMetadata { .. }),
                "{entry:?} -> {err:?}"
            );
        }
    }

    #[test]
    fn test_parse_release_validates_sha256() {
        let mut entry = release("2.0.0", &["app"]);
        entry.artifacts[0].sha256 = Some("ABC".to_string());
        assert!(parse_release(&location(), &entry).is_err());

        entry.artifacts[0].sha256 = Some("AB".repeat(32));
        let candidate = parse_release(&location(), &entry).unwrap();
        assert_eq!(candidate.artifacts[0].sha256, Some("ab".repeat(32)));
    }
}
