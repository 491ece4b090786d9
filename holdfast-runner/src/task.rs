use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

use holdfast_lock::LockStrategy;

use crate::error::{PayloadError, RunError};
use crate::locker::{Locker, LockerMode, RetryMode, WaitingMode};
use crate::settings::LockSettings;
use crate::statistics::StatisticsSnapshot;

/// Observable state of a [`LockedTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// The supervisor is still acquiring or running the payload.
    Running,
    /// The supervisor has terminated; [`LockedTask::get`] has a result.
    Finished,
}

/// Single-shot lock runner: acquires the lock, runs the payload at most
/// once, and completes when the payload completes or acquisition is
/// abandoned.
///
/// The supervisor starts immediately on construction. Dropping the
/// handle cancels the run; the detached supervisor still releases the
/// lease.
pub struct LockedTask {
    locker: Arc<Locker>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<Result<(), RunError>>>,
    result: Option<Result<(), RunError>>,
}

impl LockedTask {
    /// Start a task that waits out contention and retries transient
    /// acquisition failures.
    pub fn spawn<F, Fut>(
        name: impl Into<String>,
        payload: F,
        strategy: Arc<dyn LockStrategy>,
        settings: LockSettings,
    ) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PayloadError>> + Send + 'static,
    {
        Self::spawn_with(
            name,
            payload,
            strategy,
            settings,
            WaitingMode::Wait,
            RetryMode::Retry,
        )
    }

    /// Start a task with explicit waiting and retry behavior.
    ///
    /// Under [`WaitingMode::NoWait`], a first attempt refused by a
    /// foreign holder terminates the task successfully with the payload
    /// never run. Under [`RetryMode::SingleAttempt`], the first
    /// transient acquisition failure is propagated out of
    /// [`get`](Self::get).
    pub fn spawn_with<F, Fut>(
        name: impl Into<String>,
        payload: F,
        strategy: Arc<dyn LockStrategy>,
        settings: LockSettings,
        waiting_mode: WaitingMode,
        retry_mode: RetryMode,
    ) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PayloadError>> + Send + 'static,
    {
        let payload = Arc::new(move |cancel: CancellationToken| -> crate::locker::PayloadFuture {
            Box::pin(payload(cancel))
        });
        let locker = Arc::new(Locker::new(name, strategy, settings, payload, retry_mode));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            Arc::clone(&locker)
                .run(LockerMode::Oneshot, waiting_mode, cancel.clone())
                .instrument(info_span!("oneshot", lock = %locker.name())),
        );
        Self {
            locker,
            cancel,
            handle: Some(handle),
            result: None,
        }
    }

    /// Block until the supervisor terminates.
    pub async fn wait(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.result = Some(join(handle).await);
    }

    /// Block until the supervisor terminates or `timeout` elapses.
    /// Returns `true` when the task is finished.
    pub async fn wait_for(&mut self, timeout: Duration) -> bool {
        if self.result.is_some() {
            return true;
        }
        let Some(handle) = self.handle.as_mut() else {
            return true;
        };
        match tokio::time::timeout(timeout, &mut *handle).await {
            Ok(joined) => {
                self.handle = None;
                self.result = Some(flatten(joined));
                true
            }
            Err(_) => false,
        }
    }

    /// Wait for termination and return the run's outcome.
    ///
    /// `Ok(())` covers both a completed payload and the legitimate
    /// no-wait outcome where a contested lock was never acquired.
    ///
    /// # Errors
    ///
    /// Re-raises the payload's failure, a single-attempt acquisition
    /// failure, a lease lost under [`RetryMode::SingleAttempt`], or
    /// cancellation.
    pub async fn get(mut self) -> Result<(), RunError> {
        self.wait().await;
        self.result
            .take()
            .expect("result is recorded once the supervisor has joined")
    }

    /// Whether the supervisor has terminated.
    pub fn is_finished(&self) -> bool {
        self.result.is_some() || self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Coarse task state.
    pub fn state(&self) -> TaskState {
        if self.is_finished() {
            TaskState::Finished
        } else {
            TaskState::Running
        }
    }

    /// Request cancellation of the run. The supervisor tears the
    /// payload down, releases the lease, and terminates.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Lock name this task contends for.
    pub fn name(&self) -> &str {
        self.locker.name()
    }

    /// Owner id this task presents to the backend.
    pub fn owner_id(&self) -> &str {
        self.locker.id()
    }

    /// Snapshot of the runner's counters and duration percentiles.
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.locker.statistics()
    }

    /// Span between first acquisition and the latest proven refresh of
    /// the current lease, or `None` while unlocked.
    pub fn locked_duration(&self) -> Option<Duration> {
        self.locker.locked_duration()
    }
}

impl Drop for LockedTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn join(handle: JoinHandle<Result<(), RunError>>) -> Result<(), RunError> {
    flatten(handle.await)
}

fn flatten(joined: Result<Result<(), RunError>, tokio::task::JoinError>) -> Result<(), RunError> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(RunError::Cancelled),
    }
}
