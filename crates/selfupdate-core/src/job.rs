//! Background jobs with cancellation, progress, and a single completion callback.
//!
//! A [`JobHandle`] is returned by [`JobHandle::spawn`] (or
//! [`JobHandle::completed`] for work that finished synchronously). The work
//! receives a [`JobContext`] through which it observes cancellation and
//! reports progress. Completion is delivered exactly once, either to a
//! listener registered with [`JobHandle::on_complete`] or to
//! [`JobHandle::wait`].

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::JobError;

/// Cooperative cancellation flag shared between a handle and its work.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancelState>,
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Latest progress reported by a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub phase: String,
    pub completed: u64,
    pub total: Option<u64>,
}

/// Handed to the work future of a job.
#[derive(Debug, Clone)]
pub struct JobContext {
    cancel: CancellationToken,
    progress: Arc<watch::Sender<JobProgress>>,
}

impl JobContext {
    /// A context not attached to any handle, for running work inline.
    pub fn detached() -> Self {
        let (tx, _rx) = watch::channel(JobProgress::default());
        Self {
            cancel: CancellationToken::new(),
            progress: Arc::new(tx),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn report(&self, phase: impl Into<String>, completed: u64, total: Option<u64>) {
        self.progress.send_replace(JobProgress {
            phase: phase.into(),
            completed,
            total,
        });
    }

    /// Run `fut` unless cancellation arrives first; `None` means cancelled.
    ///
    /// The future is dropped at its current await point on cancellation, so
    /// only pass work that is safe to abandon.
    pub async fn run_cancellable<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

type Completion<T> = oneshot::Receiver<Result<T, JobError>>;

/// Handle to a running (or already completed) background job.
pub struct JobHandle<T> {
    id: Uuid,
    name: String,
    cancel: CancellationToken,
    progress: watch::Receiver<JobProgress>,
    finished: Arc<AtomicBool>,
    completion: Option<Completion<T>>,
}

impl<T: Send + 'static> JobHandle<T> {
    /// Spawn `work` on the tokio runtime.
    pub fn spawn<F, Fut>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let name = name.into();
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(JobProgress::default());
        let finished = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = oneshot::channel();

        let ctx = JobContext {
            cancel: cancel.clone(),
            progress: Arc::new(progress_tx),
        };
        let fut = work(ctx);

        let task_name = name.clone();
        let task_finished = Arc::clone(&finished);
        tokio::spawn(async move {
            let result = AssertUnwindSafe(fut)
                .catch_unwind()
                .await
                .map_err(|panic| JobError::Panicked {
                    name: task_name.clone(),
                    message: panic_message(panic.as_ref()),
                });
            task_finished.store(true, Ordering::SeqCst);
            if done_tx.send(result).is_err() {
                debug!(job = %task_name, "job completed with no listener");
            }
        });

        debug!(job = %name, job_id = %id, "job spawned");
        Self {
            id,
            name,
            cancel,
            progress: progress_rx,
            finished,
            completion: Some(done_rx),
        }
    }

    /// A handle whose outcome is already known; no task is spawned.
    pub fn completed(name: impl Into<String>, value: T) -> Self {
        let (_progress_tx, progress_rx) = watch::channel(JobProgress::default());
        let (done_tx, done_rx) = oneshot::channel();
        // The receiver is alive in `done_rx`, so this cannot fail.
        let _ = done_tx.send(Ok(value));
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            cancel: CancellationToken::new(),
            progress: progress_rx,
            finished: Arc::new(AtomicBool::new(true)),
            completion: Some(done_rx),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request cancellation; the work observes it at its next checkpoint.
    pub fn cancel(&self) {
        debug!(job = %self.name, job_id = %self.id, "job cancellation requested");
        self.cancel.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> JobProgress {
        self.progress.borrow().clone()
    }

    /// Subscribe to progress updates.
    pub fn watch_progress(&self) -> watch::Receiver<JobProgress> {
        self.progress.clone()
    }

    /// Register the single completion listener.
    ///
    /// The listener runs on its own task once the job terminates. Returns
    /// `false` if the completion was already claimed.
    pub fn on_complete<L>(&mut self, listener: L) -> bool
    where
        L: FnOnce(Result<T, JobError>) + Send + 'static,
    {
        let Some(rx) = self.completion.take() else {
            warn!(job = %self.name, "completion listener already registered");
            return false;
        };
        let name = self.name.clone();
        tokio::spawn(async move {
            listener(rx.await.unwrap_or(Err(JobError::Lost { name })));
        });
        true
    }

    /// Wait for the job to terminate.
    pub async fn wait(mut self) -> Result<T, JobError> {
        match self.completion.take() {
            Some(rx) => rx.await.unwrap_or(Err(JobError::Lost {
                name: self.name.clone(),
            })),
            None => Err(JobError::Lost {
                name: self.name.clone(),
            }),
        }
    }
}

impl<T> fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("cancel_requested", &self.cancel.is_cancelled())
            .field("finished", &self.finished.load(Ordering::SeqCst))
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
