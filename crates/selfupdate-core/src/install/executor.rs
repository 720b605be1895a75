//! Applies an [`UpdatePlan`] to the install root as a background job.
//!
//! Phases:
//! 1. preflight: synchronous host check, before anything is spawned
//! 2. stage: download every artifact into `.selfupdate/staging/<version>`
//!    and verify digests; cancellable
//! 3. commit: back up replaced files and move staged files into place; runs
//!    to completion once started, rolls back on error
//! 4. finalize: write the version marker, drop staging, the journal and
//!    the backups
//!
//! Every attempt holds [`InstallLock`] so two processes never interleave
//! journal writes or commits in one root.
//!
//! A journal left in the `committing` phase (process killed mid-commit) is
//! rolled back before the next attempt starts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use super::environment::HostEnvironment;
use super::journal::{write_atomic, InstallJournal, JournalPhase};
use super::layout::StateLayout;
use super::lock::InstallLock;
use crate::domain::{InstallError, InstallOutcome, UpdatePlan};
use crate::job::{JobContext, JobHandle};
use crate::repository::ArtifactFetcher;

const JOB_NAME: &str = "install-update";

/// Installs update plans into a single install root.
#[derive(Clone)]
pub struct InstallExecutor {
    install_root: PathBuf,
    fetcher: Arc<dyn ArtifactFetcher>,
    environment: Arc<dyn HostEnvironment>,
}

impl InstallExecutor {
    pub fn new(
        install_root: impl Into<PathBuf>,
        fetcher: Arc<dyn ArtifactFetcher>,
        environment: Arc<dyn HostEnvironment>,
    ) -> Self {
        Self {
            install_root: install_root.into(),
            fetcher,
            environment,
        }
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Synchronous, side-effect-free host check.
    pub fn preflight(&self) -> Result<(), InstallError> {
        self.environment
            .check(&self.install_root)
            .map_err(|reason| InstallError::EnvironmentUnsupported { reason })
    }

    /// Start installing `plan`; returns immediately.
    ///
    /// When the preflight fails the handle is already completed with
    /// `InstallFailed(EnvironmentUnsupported)` and nothing was fetched or
    /// written.
    pub fn install(&self, plan: UpdatePlan) -> JobHandle<InstallOutcome> {
        if let Err(err) = self.preflight() {
            warn!("Refusing to install {}: {}", plan.target(), err);
            return JobHandle::completed(JOB_NAME, InstallOutcome::InstallFailed(err));
        }

        let executor = self.clone();
        JobHandle::spawn(JOB_NAME, move |ctx| async move {
            executor.execute(plan, &ctx).await
        })
    }

    /// Journal left behind by an earlier failed or interrupted attempt.
    pub async fn pending_journal(&self) -> Result<Option<InstallJournal>, InstallError> {
        InstallJournal::load(&StateLayout::new(&self.install_root)).await
    }

    async fn execute(&self, plan: UpdatePlan, ctx: &JobContext) -> InstallOutcome {
        let layout = StateLayout::new(&self.install_root);
        info!("Installing update {}", plan);
        match self.apply(&plan, &layout, ctx).await {
            Ok(()) => {
                info!("Installed version {}", plan.target());
                InstallOutcome::Installed {
                    version: plan.target().clone(),
                }
            }
            Err(InstallError::Cancelled) => {
                info!("Install of {} cancelled", plan.target());
                InstallOutcome::Cancelled
            }
            Err(err) => {
                error!("Install of {} failed: {}", plan.target(), err);
                InstallOutcome::InstallFailed(err)
            }
        }
    }

    async fn apply(
        &self,
        plan: &UpdatePlan,
        layout: &StateLayout,
        ctx: &JobContext,
    ) -> Result<(), InstallError> {
        if ctx.is_cancelled() {
            return Err(InstallError::Cancelled);
        }

        // Held until this attempt has finished or rolled back.
        let _lock = InstallLock::acquire(layout).await?;
        recover(layout).await?;

        let mut journal = InstallJournal::new(
            plan.current().to_string(),
            plan.target().to_string(),
            plan.artifacts().iter().map(|a| a.path.clone()).collect(),
        );
        journal.save(layout).await?;

        let staging = layout.staging(plan.target());
        if let Err(err) = self.stage(plan, &staging, ctx).await {
            remove_dir_quietly(&staging).await;
            if matches!(err, InstallError::Cancelled) {
                InstallJournal::remove(layout).await?;
            } else {
                journal.fail(JournalPhase::Failed, &err);
                journal.save(layout).await?;
            }
            return Err(err);
        }

        // Last cancellation checkpoint: the commit always runs to completion.
        if ctx.is_cancelled() {
            remove_dir_quietly(&staging).await;
            InstallJournal::remove(layout).await?;
            return Err(InstallError::Cancelled);
        }

        journal.set_phase(JournalPhase::Committing);
        journal.save(layout).await?;

        if let Err(err) = commit(plan, layout, &staging, &mut journal, ctx).await {
            error!("Commit of {} failed, rolling back: {}", plan.target(), err);
            match rollback(layout, &journal).await {
                Ok(()) => {
                    journal.fail(JournalPhase::RolledBack, &err);
                    journal.save(layout).await?;
                    remove_dir_quietly(&staging).await;
                }
                Err(rollback_err) => {
                    // Phase stays `committing`, so the next attempt retries the rollback.
                    error!("Rollback failed: {}", rollback_err);
                    journal.last_error = Some(format!("{err}; rollback: {rollback_err}"));
                    journal.save(layout).await?;
                }
            }
            return Err(err);
        }

        remove_dir_quietly(&staging).await;
        InstallJournal::remove(layout).await?;
        // Backups only serve to undo this commit; the journal is gone now.
        remove_dir_quietly(&layout.backup_root()).await;
        Ok(())
    }

    async fn stage(
        &self,
        plan: &UpdatePlan,
        staging: &Path,
        ctx: &JobContext,
    ) -> Result<(), InstallError> {
        create_dir_all(staging).await?;

        let total = plan.artifacts().len() as u64;
        for (i, artifact) in plan.artifacts().iter().enumerate() {
            ctx.report("downloading", i as u64, Some(total));

            let dest = staging.join(&artifact.path);
            if let Some(parent) = dest.parent() {
                create_dir_all(parent).await?;
            }

            debug!("Staging {} from {}", artifact.path.display(), artifact.url);
            ctx.run_cancellable(self.fetcher.fetch(artifact, &dest))
                .await
                .ok_or(InstallError::Cancelled)??;

            if let Some(expected) = &artifact.sha256 {
                let actual = sha256_file(&dest).await?;
                if &actual != expected {
                    return Err(InstallError::DigestMismatch {
                        path: artifact.path.clone(),
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
        }

        ctx.report("downloading", total, Some(total));
        Ok(())
    }
}

async fn commit(
    plan: &UpdatePlan,
    layout: &StateLayout,
    staging: &Path,
    journal: &mut InstallJournal,
    ctx: &JobContext,
) -> Result<(), InstallError> {
    let backups = layout.backup(&journal.from);
    let total = plan.artifacts().len() as u64;

    for (i, artifact) in plan.artifacts().iter().enumerate() {
        ctx.report("committing", i as u64, Some(total));

        let staged = staging.join(&artifact.path);
        let target = layout.target(&artifact.path);
        if let Some(parent) = target.parent() {
            create_dir_all(parent).await?;
        }

        // The journal records intent before each move so an interrupted
        // commit can be undone.
        if exists(&target).await? {
            let backup = backups.join(&artifact.path);
            if let Some(parent) = backup.parent() {
                create_dir_all(parent).await?;
            }
            if exists(&backup).await? {
                remove_path(&backup).await?;
            }
            journal.replaced.push(artifact.path.clone());
            journal.save(layout).await?;
            rename(&target, &backup).await?;
        } else {
            journal.created.push(artifact.path.clone());
            journal.save(layout).await?;
        }

        rename(&staged, &target).await?;
    }

    write_atomic(&layout.version_marker(), plan.target().to_string().as_bytes()).await?;
    ctx.report("committing", total, Some(total));
    Ok(())
}

/// Undo the file moves recorded in `journal`.
async fn rollback(layout: &StateLayout, journal: &InstallJournal) -> Result<(), InstallError> {
    let backups = layout.backup(&journal.from);

    for path in journal.created.iter().rev() {
        let target = layout.target(path);
        if exists(&target).await? {
            remove_path(&target).await?;
        }
    }

    for path in journal.replaced.iter().rev() {
        let backup = backups.join(path);
        if exists(&backup).await? {
            let target = layout.target(path);
            if exists(&target).await? {
                remove_path(&target).await?;
            }
            rename(&backup, &target).await?;
        }
    }

    info!(
        "Rolled back {} -> {} ({} restored, {} removed)",
        journal.from,
        journal.to,
        journal.replaced.len(),
        journal.created.len()
    );
    Ok(())
}

/// Finish whatever an earlier attempt left behind.
async fn recover(layout: &StateLayout) -> Result<(), InstallError> {
    if let Some(journal) = InstallJournal::load(layout).await? {
        if journal.is_interrupted_commit() {
            warn!(
                "Found interrupted install {} -> {}, rolling back",
                journal.from, journal.to
            );
            rollback(layout, &journal).await?;
        } else {
            info!(
                "Retrying after previous install {} -> {} ended {:?}",
                journal.from, journal.to, journal.phase
            );
        }
        InstallJournal::remove(layout).await?;
    }
    remove_dir_quietly(&layout.staging_root()).await;
    remove_dir_quietly(&layout.backup_root()).await;
    Ok(())
}

/// Read the version recorded by the last successful install.
pub async fn installed_version(
    install_root: &Path,
) -> Result<Option<semver::Version>, InstallError> {
    let marker = StateLayout::new(install_root).version_marker();
    match tokio::fs::read_to_string(&marker).await {
        Ok(raw) => semver::Version::parse(raw.trim()).map(Some).map_err(|e| {
            InstallError::Unknown(format!("corrupt version marker {}: {e}", marker.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(InstallError::io("reading version marker", e)),
    }
}

async fn sha256_file(path: &Path) -> Result<String, InstallError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| InstallError::io(format!("opening {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| InstallError::io(format!("reading {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

async fn exists(path: &Path) -> Result<bool, InstallError> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(InstallError::io(format!("inspecting {}", path.display()), e)),
    }
}

async fn create_dir_all(path: &Path) -> Result<(), InstallError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| InstallError::io(format!("creating {}", path.display()), e))
}

async fn rename(from: &Path, to: &Path) -> Result<(), InstallError> {
    tokio::fs::rename(from, to).await.map_err(|e| {
        InstallError::io(format!("moving {} to {}", from.display(), to.display()), e)
    })
}

async fn remove_path(path: &Path) -> Result<(), InstallError> {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        _ => tokio::fs::remove_file(path).await,
    };
    result.map_err(|e| InstallError::io(format!("removing {}", path.display()), e))
}

async fn remove_dir_quietly(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sha256_file_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_installed_version_reads_marker() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(installed_version(dir.path()).await.unwrap(), None);

        let layout = StateLayout::new(dir.path());
        write_atomic(&layout.version_marker(), b"2.1.0\n").await.unwrap();
        assert_eq!(
            installed_version(dir.path()).await.unwrap(),
            Some(semver::Version::new(2, 1, 0))
        );
    }

    #[tokio::test]
    async fn test_recover_rolls_back_interrupted_commit() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());

        // Simulate a crash after `app` was swapped and `new.cfg` was created.
        std::fs::create_dir_all(layout.backup("1.0.0")).unwrap();
        std::fs::write(layout.backup("1.0.0").join("app"), b"old").unwrap();
        std::fs::write(dir.path().join("app"), b"new").unwrap();
        std::fs::write(dir.path().join("new.cfg"), b"cfg").unwrap();

        let mut journal = InstallJournal::new(
            "1.0.0".into(),
            "2.0.0".into(),
            vec![PathBuf::from("app"), PathBuf::from("new.cfg")],
        );
        journal.set_phase(JournalPhase::Committing);
        journal.replaced.push(PathBuf::from("app"));
        journal.created.push(PathBuf::from("new.cfg"));
        journal.save(&layout).await.unwrap();

        recover(&layout).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("app")).unwrap(), b"old");
        assert!(!dir.path().join("new.cfg").exists());
        assert!(InstallJournal::load(&layout).await.unwrap().is_none());
        assert!(!layout.backup_root().exists());
    }
}
