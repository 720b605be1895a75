//! The update job coordinator.
//!
//! One actor task owns the [`UpdateState`] and the active [`JobHandle`]s.
//! External callers talk to it through [`UpdateCoordinator`]; job
//! completions come back over an internal channel, so every state change
//! happens on the actor and never inside the call that triggered it.
//!
//! Sink calls run on a separate settle task so a slow prompt never blocks
//! the actor. The check stays active until that task reports back, and new
//! checks are rejected until then.

pub mod state;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use semver::Version;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::UpdateConfig;
use crate::domain::{
    CheckStatus, ConfigError, CoordinatorError, InstallOutcome, JobError, ResolutionResult,
};
use crate::install::{InstallExecutor, ProcessEnvironment};
use crate::job::JobHandle;
use crate::notify::{NotificationSink, UserNotice};
use crate::obs;
use crate::repository::RemoteRepository;
use crate::resolver::UpdateResolver;
use crate::source::RepositorySource;

pub use state::{Transition, UpdateState};

const TRANSITION_CAPACITY: usize = 64;

enum Command {
    Check {
        reply: oneshot::Sender<Result<CheckTicket, CoordinatorError>>,
    },
    Cancel {
        check_id: Uuid,
    },
}

enum Event {
    Resolved {
        check_id: Uuid,
        result: Result<ResolutionResult, JobError>,
    },
    Installed {
        check_id: Uuid,
        result: Result<InstallOutcome, JobError>,
    },
    Settled {
        check_id: Uuid,
        status: CheckStatus,
    },
}

/// Handle to the coordinator actor. Cheap to clone.
#[derive(Clone)]
pub struct UpdateCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<UpdateState>,
    transitions: broadcast::Sender<Transition>,
}

impl UpdateCoordinator {
    /// Start the actor on the current tokio runtime.
    pub fn spawn(
        config: UpdateConfig,
        resolver: UpdateResolver,
        executor: InstallExecutor,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let current = config.current_version()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (actor, events_rx) = Actor::new(
            RepositorySource::from_config(&config),
            current,
            resolver,
            executor,
            sink,
            commands_tx.downgrade(),
        );
        let state_rx = actor.state.subscribe();
        let transitions = actor.transitions.clone();
        info!(
            "Update coordinator started (version {}, {} repositories)",
            actor.current,
            actor.source.raw().len()
        );
        tokio::spawn(actor.run(commands_rx, events_rx));

        Ok(Self {
            commands: commands_tx,
            state: state_rx,
            transitions,
        })
    }

    /// Wire the coordinator to remote repositories and the real host.
    pub fn from_config(
        config: UpdateConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, ConfigError> {
        let repository = Arc::new(RemoteRepository::new(&config)?);
        let resolver = UpdateResolver::new(repository.clone())
            .with_prerelease(config.include_prerelease);
        let executor = InstallExecutor::new(
            config.install_root.clone(),
            repository,
            Arc::new(ProcessEnvironment::current()),
        );
        Self::spawn(config, resolver, executor, sink)
    }

    /// Start a check cycle.
    ///
    /// Fails with [`CoordinatorError::CheckInProgress`] while another cycle
    /// has not settled yet.
    pub async fn check_for_updates(&self) -> Result<CheckTicket, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Check { reply })
            .map_err(|_| CoordinatorError::Closed)?;
        rx.await.map_err(|_| CoordinatorError::Closed)?
    }

    pub fn state(&self) -> UpdateState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<UpdateState> {
        self.state.clone()
    }

    /// Receive every state transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }
}

/// A check cycle started by [`UpdateCoordinator::check_for_updates`].
pub struct CheckTicket {
    id: Uuid,
    status: oneshot::Receiver<CheckStatus>,
    canceller: CheckCanceller,
}

impl CheckTicket {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Forward cancellation to the running job.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// A detached handle that can cancel this check from another task.
    pub fn canceller(&self) -> CheckCanceller {
        self.canceller.clone()
    }

    /// Wait until the cycle has settled, including its notification.
    pub async fn wait(self) -> Result<CheckStatus, CoordinatorError> {
        self.status.await.map_err(|_| CoordinatorError::Closed)
    }
}

impl std::fmt::Debug for CheckTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckTicket").field("id", &self.id).finish()
    }
}

/// Cancels one check cycle. Cheap to clone.
#[derive(Clone)]
pub struct CheckCanceller {
    check_id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
}

impl CheckCanceller {
    pub fn cancel(&self) {
        let check_id = self.check_id;
        if self.commands.send(Command::Cancel { check_id }).is_err() {
            debug!(check_id = %check_id, "coordinator gone, cancel dropped");
        }
    }
}

enum ActiveJob {
    Settling,
    Resolve(JobHandle<ResolutionResult>),
    Install(JobHandle<InstallOutcome>),
}

struct ActiveCheck {
    id: Uuid,
    started: Instant,
    job: ActiveJob,
    cancel_requested: bool,
    reply: Option<oneshot::Sender<CheckStatus>>,
}

/// What the settle task tells the sink.
enum Notification {
    NoUpdate,
    Error(UserNotice),
    OfferRestart,
}

struct Actor {
    source: RepositorySource,
    current: Version,
    resolver: UpdateResolver,
    executor: InstallExecutor,
    sink: Arc<dyn NotificationSink>,
    /// Weak so the actor stops once every handle and ticket is dropped.
    commands: mpsc::WeakUnboundedSender<Command>,
    events: mpsc::UnboundedSender<Event>,
    state: watch::Sender<UpdateState>,
    transitions: broadcast::Sender<Transition>,
    active: Option<ActiveCheck>,
}

impl Actor {
    fn new(
        source: RepositorySource,
        current: Version,
        resolver: UpdateResolver,
        executor: InstallExecutor,
        sink: Arc<dyn NotificationSink>,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(UpdateState::Idle);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let actor = Actor {
            source,
            current,
            resolver,
            executor,
            sink,
            commands,
            events,
            state,
            transitions,
            active: None,
        };
        (actor, events_rx)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        let mut commands_open = true;
        loop {
            tokio::select! {
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => commands_open = false,
                },
                Some(event) = events.recv() => self.handle_event(event),
                else => break,
            }
            if !commands_open && self.active.is_none() {
                break;
            }
        }
        debug!("Update coordinator stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Check { reply } => {
                let result = self.start_check();
                if reply.send(result).is_err() {
                    debug!("check requester went away");
                }
            }
            Command::Cancel { check_id } => self.cancel(check_id),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Resolved { check_id, result } => {
                if self.is_active(check_id) {
                    self.on_resolved(check_id, result);
                }
            }
            Event::Installed { check_id, result } => {
                if self.is_active(check_id) {
                    self.on_installed(check_id, result);
                }
            }
            Event::Settled { check_id, status } => self.on_settled(check_id, status),
        }
    }

    fn is_active(&self, check_id: Uuid) -> bool {
        let active = self.active.as_ref().is_some_and(|a| a.id == check_id);
        if !active {
            warn!(check_id = %check_id, "dropping completion for a check that is not active");
        }
        active
    }

    fn start_check(&mut self) -> Result<CheckTicket, CoordinatorError> {
        if let Some(active) = &self.active {
            obs::emit_check_rejected(&format!("check {} still in progress", active.id));
            return Err(CoordinatorError::CheckInProgress);
        }

        let commands = self.commands.upgrade().ok_or(CoordinatorError::Closed)?;
        let check_id = Uuid::new_v4();
        let _span = obs::CheckSpan::enter(check_id);
        obs::emit_check_started(check_id, &self.current.to_string(), self.source.raw().len());
        self.transition(check_id, UpdateState::Resolving);

        let mut handle = match self.source.locations() {
            Ok(locations) => self.resolver.spawn(self.current.clone(), locations),
            Err(invalid) => JobHandle::completed(
                "resolve-updates",
                ResolutionResult::ResolutionFailed(invalid.into()),
            ),
        };
        let events = self.events.clone();
        handle.on_complete(move |result| {
            if events.send(Event::Resolved { check_id, result }).is_err() {
                debug!(check_id = %check_id, "coordinator gone, resolution dropped");
            }
        });

        let (reply, status) = oneshot::channel();
        self.active = Some(ActiveCheck {
            id: check_id,
            started: Instant::now(),
            job: ActiveJob::Resolve(handle),
            cancel_requested: false,
            reply: Some(reply),
        });

        Ok(CheckTicket {
            id: check_id,
            status,
            canceller: CheckCanceller { check_id, commands },
        })
    }

    fn cancel(&mut self, check_id: Uuid) {
        let Some(active) = self.active.as_mut().filter(|a| a.id == check_id) else {
            debug!(check_id = %check_id, "cancel for a check that is not active");
            return;
        };
        let _span = obs::CheckSpan::enter(check_id);
        active.cancel_requested = true;
        match &active.job {
            ActiveJob::Resolve(handle) => handle.cancel(),
            ActiveJob::Install(handle) => handle.cancel(),
            ActiveJob::Settling => debug!("cancel requested while settling, nothing to stop"),
        }
    }

    fn on_resolved(&mut self, check_id: Uuid, result: Result<ResolutionResult, JobError>) {
        let _span = obs::CheckSpan::enter(check_id);
        self.set_job(ActiveJob::Settling);

        let result = match result {
            Ok(result) => result,
            Err(job_error) => {
                self.transition(check_id, UpdateState::ResolutionError);
                let notice =
                    self.report(check_id, UserNotice::from_job_error(&job_error), &job_error);
                self.settle(check_id, CheckStatus::ResolutionError, Notification::Error(notice));
                return;
            }
        };

        let target = match &result {
            ResolutionResult::UpdateFound(plan) => Some(plan.target().to_string()),
            _ => None,
        };
        obs::emit_resolved(check_id, result.label(), target.as_deref());

        match result {
            ResolutionResult::NoUpdateAvailable => {
                self.transition(check_id, UpdateState::NoUpdate);
                self.settle(check_id, CheckStatus::NoUpdateAvailable, Notification::NoUpdate);
            }
            ResolutionResult::ResolutionFailed(err) => {
                self.transition(check_id, UpdateState::ResolutionError);
                let status = if err.is_cancelled() {
                    CheckStatus::Cancelled
                } else {
                    CheckStatus::ResolutionError
                };
                let notice = self.report(check_id, UserNotice::from_resolve_error(&err), &err);
                self.settle(check_id, status, Notification::Error(notice));
            }
            ResolutionResult::UpdateFound(plan) => {
                self.transition(check_id, UpdateState::InstallPending);
                obs::emit_install_started(
                    check_id,
                    &plan.current().to_string(),
                    &plan.target().to_string(),
                    plan.artifacts().len(),
                );

                let mut handle = self.executor.install(plan);
                if self.active.as_ref().is_some_and(|a| a.cancel_requested) {
                    handle.cancel();
                }
                let events = self.events.clone();
                handle.on_complete(move |result| {
                    if events.send(Event::Installed { check_id, result }).is_err() {
                        debug!(check_id = %check_id, "coordinator gone, install outcome dropped");
                    }
                });
                self.set_job(ActiveJob::Install(handle));
                self.transition(check_id, UpdateState::Installing);
            }
        }
    }

    fn on_installed(&mut self, check_id: Uuid, result: Result<InstallOutcome, JobError>) {
        let _span = obs::CheckSpan::enter(check_id);
        self.set_job(ActiveJob::Settling);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(job_error) => {
                self.transition(check_id, UpdateState::InstallFailed);
                let notice =
                    self.report(check_id, UserNotice::from_job_error(&job_error), &job_error);
                self.settle(check_id, CheckStatus::InstallFailed, Notification::Error(notice));
                return;
            }
        };
        obs::emit_install_finished(check_id, outcome.label());

        match outcome {
            InstallOutcome::Installed { .. } => {
                self.transition(check_id, UpdateState::InstallSucceeded);
                self.settle(check_id, CheckStatus::InstallSucceeded, Notification::OfferRestart);
            }
            InstallOutcome::InstallFailed(err) => {
                self.transition(check_id, UpdateState::InstallFailed);
                let notice = self.report(check_id, UserNotice::from_install_error(&err), &err);
                self.settle(check_id, CheckStatus::InstallFailed, Notification::Error(notice));
            }
            InstallOutcome::Cancelled => {
                self.transition(check_id, UpdateState::InstallFailed);
                let notice =
                    self.report(check_id, UserNotice::install_cancelled(), &"install cancelled");
                self.settle(check_id, CheckStatus::Cancelled, Notification::Error(notice));
            }
        }
    }

    fn on_settled(&mut self, check_id: Uuid, status: CheckStatus) {
        if !self.active.as_ref().is_some_and(|a| a.id == check_id) {
            warn!(check_id = %check_id, "settled a check that is not active");
            return;
        }
        let Some(mut active) = self.active.take() else {
            return;
        };
        let _span = obs::CheckSpan::enter(check_id);
        obs::emit_check_finished(check_id, status, active.started.elapsed().as_millis() as u64);
        if let Some(reply) = active.reply.take() {
            if reply.send(status).is_err() {
                debug!("check ticket dropped before completion");
            }
        }
    }

    fn set_job(&mut self, job: ActiveJob) {
        if let Some(active) = self.active.as_mut() {
            active.job = job;
        }
    }

    /// Log `cause` under a fresh reference and attach it to `notice`.
    fn report(
        &self,
        check_id: Uuid,
        notice: UserNotice,
        cause: &dyn std::fmt::Display,
    ) -> UserNotice {
        let reference = Uuid::new_v4();
        obs::emit_error(check_id, reference, cause);
        notice.with_reference(reference)
    }

    fn transition(&mut self, check_id: Uuid, to: UpdateState) {
        let from = *self.state.borrow();
        if !from.can_transition_to(to) {
            error!(check_id = %check_id, %from, %to, "refusing illegal state transition");
            return;
        }
        self.state.send_replace(to);
        obs::emit_state_changed(check_id, from, to);
        // No subscribers is fine.
        let _ = self.transitions.send(Transition { check_id, from, to });
    }

    /// Deliver the terminal notification off the actor, then report back.
    fn settle(&self, check_id: Uuid, status: CheckStatus, notification: Notification) {
        let sink = Arc::clone(&self.sink);
        let events = self.events.clone();
        tokio::spawn(async move {
            let delivery = async {
                match notification {
                    Notification::NoUpdate => sink.notify_no_update().await,
                    Notification::Error(notice) => sink.notify_error(&notice).await,
                    Notification::OfferRestart => {
                        if sink.confirm_restart().await {
                            info!("Restart confirmed");
                            sink.restart_host().await;
                        } else {
                            info!("Restart declined; the update takes effect on next start");
                        }
                    }
                }
            };
            if AssertUnwindSafe(delivery).catch_unwind().await.is_err() {
                error!(check_id = %check_id, "notification sink panicked");
            }
            if events.send(Event::Settled { check_id, status }).is_err() {
                debug!(check_id = %check_id, "coordinator gone before settling");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MemoryRepository, RecordingSink, StaticEnvironment};
    use crate::job::JobContext;
    use crate::source::RepositoryLocation;

    const REPO: &str = "https://updates.example.com/stable";

    #[tokio::test]
    async fn test_update_found_after_cancel_starts_install_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app"), b"v1").unwrap();
        let repo = MemoryRepository::new().with_release(REPO, "2.0.0", &[("app", b"v2")]);
        let resolver = UpdateResolver::new(Arc::new(repo.clone()));
        let executor = InstallExecutor::new(
            dir.path(),
            Arc::new(repo.clone()),
            Arc::new(StaticEnvironment::supported()),
        );
        let sink = Arc::new(RecordingSink::new(true));
        let (commands, _commands_rx) = mpsc::unbounded_channel();
        let (mut actor, mut events) = Actor::new(
            RepositorySource::new([REPO]),
            Version::new(1, 0, 0),
            resolver.clone(),
            executor,
            sink.clone(),
            commands.downgrade(),
        );

        let ticket = actor.start_check().unwrap();
        actor.cancel(ticket.id());

        // The resolution completes as if it had finished just before the cancel.
        let result = resolver
            .resolve(
                &Version::new(1, 0, 0),
                &[RepositoryLocation::parse(REPO).unwrap()],
                &JobContext::detached(),
            )
            .await;
        assert!(matches!(result, ResolutionResult::UpdateFound(_)));
        actor.on_resolved(ticket.id(), Ok(result));
        assert_eq!(*actor.state.borrow(), UpdateState::Installing);

        loop {
            match events.recv().await.unwrap() {
                // The spawned resolve job's own completion; already superseded.
                Event::Resolved { .. } => continue,
                event @ Event::Settled { .. } => {
                    actor.handle_event(event);
                    break;
                }
                event => actor.handle_event(event),
            }
        }

        assert_eq!(ticket.wait().await.unwrap(), CheckStatus::Cancelled);
        assert_eq!(*actor.state.borrow(), UpdateState::InstallFailed);
        assert!(actor.active.is_none());
        assert_eq!(repo.fetch_calls(), 0);
        assert_eq!(std::fs::read(dir.path().join("app")).unwrap(), b"v1");
        assert_eq!(sink.confirm_count(), 0);
        assert_eq!(sink.errors().len(), 1);
        assert_eq!(sink.errors()[0].title, "Update cancelled");
    }
}
