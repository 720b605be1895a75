use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use selfupdate_core::fakes::{MemoryRepository, RecordingSink, StaticEnvironment};
use selfupdate_core::install::{InstallJournal, StateLayout};
use selfupdate_core::{
    CheckStatus, InstallExecutor, InstallOutcome, JobContext, RepositoryLocation,
    ResolutionResult, ResolveError, UpdateConfig, UpdateCoordinator, UpdateResolver,
    UpdateState,
};

const REPO: &str = "https://updates.example.com/stable";
const BOUND: Duration = Duration::from_secs(5);

#[tokio::test]
async fn cancelled_resolution_job_finishes_promptly() {
    let repo = MemoryRepository::new().with_hanging(REPO);
    let handle = UpdateResolver::new(Arc::new(repo))
        .spawn(Version::new(1, 0, 0), vec![RepositoryLocation::parse(REPO).unwrap()]);
    handle.cancel();

    let result = tokio::time::timeout(BOUND, handle.wait())
        .await
        .expect("cancellation is bounded")
        .unwrap();
    assert!(matches!(
        result,
        ResolutionResult::ResolutionFailed(ResolveError::Cancelled)
    ));
}

#[tokio::test]
async fn cancelled_install_job_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app"), b"v1").unwrap();
    let repo = MemoryRepository::new()
        .with_release(REPO, "2.0.0", &[("app", b"v2")])
        .hang_downloads();

    let ResolutionResult::UpdateFound(plan) = UpdateResolver::new(Arc::new(repo.clone()))
        .resolve(
            &Version::new(1, 0, 0),
            &[RepositoryLocation::parse(REPO).unwrap()],
            &JobContext::detached(),
        )
        .await
    else {
        panic!("expected UpdateFound");
    };

    let executor = InstallExecutor::new(
        dir.path(),
        Arc::new(repo.clone()),
        Arc::new(StaticEnvironment::supported()),
    );
    let handle = executor.install(plan);
    let mut progress = handle.watch_progress();
    progress
        .wait_for(|p| p.phase == "downloading")
        .await
        .unwrap();
    handle.cancel();

    let outcome = tokio::time::timeout(BOUND, handle.wait())
        .await
        .expect("cancellation is bounded")
        .unwrap();
    assert!(matches!(outcome, InstallOutcome::Cancelled));
    assert_eq!(std::fs::read(dir.path().join("app")).unwrap(), b"v1");
    assert!(InstallJournal::load(&StateLayout::new(dir.path()))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn ticket_cancel_during_install_reports_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let repo = MemoryRepository::new()
        .with_release(REPO, "2.0.0", &[("app", b"v2")])
        .hang_downloads();
    let sink = Arc::new(RecordingSink::new(true));
    let config = UpdateConfig::new("1.0.0")
        .with_repositories([REPO])
        .with_install_root(dir.path());
    let coordinator = UpdateCoordinator::spawn(
        config,
        UpdateResolver::new(Arc::new(repo.clone())),
        InstallExecutor::new(
            dir.path(),
            Arc::new(repo.clone()),
            Arc::new(StaticEnvironment::supported()),
        ),
        sink.clone(),
    )
    .unwrap();

    let mut state = coordinator.watch_state();
    let ticket = coordinator.check_for_updates().await.unwrap();
    tokio::time::timeout(BOUND, state.wait_for(|s| *s == UpdateState::Installing))
        .await
        .expect("install starts")
        .unwrap();
    ticket.cancel();

    let status = tokio::time::timeout(BOUND, ticket.wait())
        .await
        .expect("cancellation is bounded")
        .unwrap();
    assert_eq!(status, CheckStatus::Cancelled);
    assert_eq!(coordinator.state(), UpdateState::InstallFailed);
    assert_eq!(sink.confirm_count(), 0);
    assert_eq!(sink.errors().len(), 1);
    assert_eq!(sink.errors()[0].title, "Update cancelled");
    assert!(!dir.path().join("app").exists());
}

#[tokio::test]
async fn cancel_arriving_with_the_resolution_installs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app"), b"v1").unwrap();
    let repo = MemoryRepository::new()
        .with_release(REPO, "2.0.0", &[("app", b"v2")])
        .gate_index();
    let sink = Arc::new(RecordingSink::new(true));
    let config = UpdateConfig::new("1.0.0")
        .with_repositories([REPO])
        .with_install_root(dir.path());
    let coordinator = UpdateCoordinator::spawn(
        config,
        UpdateResolver::new(Arc::new(repo.clone())),
        InstallExecutor::new(
            dir.path(),
            Arc::new(repo.clone()),
            Arc::new(StaticEnvironment::supported()),
        ),
        sink.clone(),
    )
    .unwrap();

    let ticket = coordinator.check_for_updates().await.unwrap();
    tokio::time::timeout(BOUND, async {
        while repo.index_calls() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("resolver reaches the repository");

    // Let the index through and cancel before the coordinator sees the result.
    repo.release_index();
    ticket.cancel();

    let status = tokio::time::timeout(BOUND, ticket.wait())
        .await
        .expect("cancellation is bounded")
        .unwrap();
    assert_eq!(status, CheckStatus::Cancelled);
    assert!(matches!(
        coordinator.state(),
        UpdateState::ResolutionError | UpdateState::InstallFailed
    ));
    assert_eq!(repo.fetch_calls(), 0);
    assert_eq!(std::fs::read(dir.path().join("app")).unwrap(), b"v1");
    assert_eq!(sink.confirm_count(), 0);
    assert_eq!(sink.errors().len(), 1);
    assert_eq!(sink.errors()[0].title, "Update cancelled");
}
