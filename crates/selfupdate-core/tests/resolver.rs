use std::sync::Arc;

use semver::Version;
use selfupdate_core::fakes::MemoryRepository;
use selfupdate_core::{
    JobContext, RepositoryLocation, ResolutionResult, ResolveError, UpdateResolver,
};

const A: &str = "https://a.example.com/updates";
const B: &str = "https://b.example.com/updates";

fn locations(raw: &[&str]) -> Vec<RepositoryLocation> {
    raw.iter()
        .map(|s| RepositoryLocation::parse(s).expect("valid location"))
        .collect()
}

async fn resolve(repo: &MemoryRepository, current: &str, sources: &[&str]) -> ResolutionResult {
    UpdateResolver::new(Arc::new(repo.clone()))
        .resolve(
            &Version::parse(current).unwrap(),
            &locations(sources),
            &JobContext::detached(),
        )
        .await
}

#[tokio::test]
async fn newest_release_across_sources_wins() {
    let repo = MemoryRepository::new()
        .with_release(A, "1.5.0", &[("app", b"a")])
        .with_release(B, "3.0.0", &[("app", b"b")])
        .with_release(B, "2.0.0", &[("app", b"b2")]);

    match resolve(&repo, "1.0.0", &[A, B]).await {
        ResolutionResult::UpdateFound(plan) => {
            assert_eq!(plan.target(), &Version::new(3, 0, 0));
            assert_eq!(plan.current(), &Version::new(1, 0, 0));
            assert_eq!(plan.source().as_str(), "https://b.example.com/updates/");
        }
        other => panic!("expected UpdateFound, got {other:?}"),
    }
}

#[tokio::test]
async fn equal_versions_keep_the_first_source() {
    let repo = MemoryRepository::new()
        .with_release(A, "2.0.0", &[("app", b"a")])
        .with_release(B, "2.0.0", &[("app", b"b")]);

    let ResolutionResult::UpdateFound(plan) = resolve(&repo, "1.0.0", &[B, A]).await else {
        panic!("expected UpdateFound");
    };
    assert_eq!(plan.source().as_str(), "https://b.example.com/updates/");
    assert!(plan.artifacts()[0].url.starts_with("https://b.example.com/"));
}

#[tokio::test]
async fn nothing_strictly_newer_is_no_update() {
    let repo = MemoryRepository::new()
        .with_release(A, "1.0.0", &[("app", b"same")])
        .with_release(A, "0.9.0", &[("app", b"older")]);

    assert!(matches!(
        resolve(&repo, "1.0.0", &[A]).await,
        ResolutionResult::NoUpdateAvailable
    ));
}

#[tokio::test]
async fn rebuilt_release_is_not_an_update() {
    let repo = MemoryRepository::new().with_release(A, "1.0.0+build.2", &[("app", b"rebuilt")]);

    assert!(matches!(
        resolve(&repo, "1.0.0", &[A]).await,
        ResolutionResult::NoUpdateAvailable
    ));
}

#[tokio::test]
async fn build_metadata_does_not_break_source_ties() {
    let repo = MemoryRepository::new()
        .with_release(A, "2.0.0+build.1", &[("app", b"a")])
        .with_release(B, "2.0.0+build.7", &[("app", b"b")]);

    let ResolutionResult::UpdateFound(plan) = resolve(&repo, "1.0.0", &[A, B]).await else {
        panic!("expected UpdateFound");
    };
    assert_eq!(plan.source().as_str(), "https://a.example.com/updates/");
    assert_eq!(plan.target().to_string(), "2.0.0+build.1");
}

#[tokio::test]
async fn no_sources_is_no_update() {
    let repo = MemoryRepository::new();
    assert!(matches!(
        resolve(&repo, "1.0.0", &[]).await,
        ResolutionResult::NoUpdateAvailable
    ));
    assert_eq!(repo.index_calls(), 0);
}

#[tokio::test]
async fn prereleases_need_opt_in() {
    let repo = MemoryRepository::new().with_release(A, "2.0.0-rc.1", &[("app", b"rc")]);
    assert!(matches!(
        resolve(&repo, "1.0.0", &[A]).await,
        ResolutionResult::NoUpdateAvailable
    ));

    let result = UpdateResolver::new(Arc::new(repo.clone()))
        .with_prerelease(true)
        .resolve(&Version::new(1, 0, 0), &locations(&[A]), &JobContext::detached())
        .await;
    let ResolutionResult::UpdateFound(plan) = result else {
        panic!("expected UpdateFound");
    };
    assert_eq!(plan.target().to_string(), "2.0.0-rc.1");
}

#[tokio::test]
async fn any_unreachable_source_fails_resolution() {
    let repo = MemoryRepository::new()
        .with_release(A, "2.0.0", &[("app", b"a")])
        .with_unreachable(B);

    assert!(matches!(
        resolve(&repo, "1.0.0", &[A, B]).await,
        ResolutionResult::ResolutionFailed(ResolveError::Unreachable { .. })
    ));
}

#[tokio::test]
async fn malformed_index_fails_resolution() {
    let repo = MemoryRepository::new().with_malformed(A);
    assert!(matches!(
        resolve(&repo, "1.0.0", &[A]).await,
        ResolutionResult::ResolutionFailed(ResolveError::MalformedMetadata { .. })
    ));
}

#[tokio::test]
async fn spawned_resolution_reports_through_handle() {
    let repo = MemoryRepository::new().with_release(A, "2.0.0", &[("app", b"a")]);
    let handle = UpdateResolver::new(Arc::new(repo)).spawn(Version::new(1, 0, 0), locations(&[A]));
    assert_eq!(handle.name(), "resolve-updates");
    assert!(handle.wait().await.unwrap().is_update_found());
}
