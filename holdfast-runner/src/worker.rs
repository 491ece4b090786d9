use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, Instrument};

use holdfast_lock::LockStrategy;

use crate::error::{PayloadError, RunError};
use crate::locker::{Locker, LockerMode, RetryMode, WaitingMode};
use crate::settings::LockSettings;
use crate::statistics::StatisticsSnapshot;

/// Long-running lock runner: holds the lock whenever possible and keeps
/// the payload running, restarting it after every ownership cycle.
///
/// Construct with [`new`](Self::new), then [`start`](Self::start) and
/// eventually [`stop`](Self::stop). Stopping guarantees the payload is
/// no longer running when it returns; dropping a running worker without
/// stopping it first is a programmer error and is flagged.
pub struct LockedWorker {
    locker: Arc<Locker>,
    supervisor: Option<Supervisor>,
}

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), RunError>>,
}

impl LockedWorker {
    /// Create a non-started worker for the lock named `name`.
    ///
    /// `payload` is invoked once per ownership cycle and receives a
    /// cancellation token it should honor at its own suspension points.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        payload: F,
        strategy: Arc<dyn LockStrategy>,
        settings: LockSettings,
    ) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PayloadError>> + Send + 'static,
    {
        let payload = Arc::new(move |cancel: CancellationToken| -> crate::locker::PayloadFuture {
            Box::pin(payload(cancel))
        });
        Self {
            locker: Arc::new(Locker::new(
                name,
                strategy,
                settings,
                payload,
                RetryMode::Retry,
            )),
            supervisor: None,
        }
    }

    /// Spawn the supervisor.
    ///
    /// # Panics
    ///
    /// Panics when the worker is already started.
    pub fn start(&mut self) {
        assert!(
            self.supervisor.is_none(),
            "worker for lock '{}' is already started",
            self.locker.name()
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            Arc::clone(&self.locker)
                .run(LockerMode::Worker, WaitingMode::Wait, cancel.clone())
                .instrument(info_span!("worker", lock = %self.locker.name())),
        );
        self.supervisor = Some(Supervisor { cancel, handle });
    }

    /// Cancel the supervisor and wait for it to finish.
    ///
    /// The payload is guaranteed not to be running when this returns,
    /// and the lease has been released (best-effort). Calling `stop` on
    /// a worker that was never started, or stopping twice, is a no-op.
    pub async fn stop(&mut self) {
        let Some(supervisor) = self.supervisor.take() else {
            return;
        };
        supervisor.cancel.cancel();
        match supervisor.handle.await {
            Ok(Err(RunError::Cancelled)) | Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(lock = %self.locker.name(), error = %err, "worker supervisor ended with error")
            }
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => {}
        }
    }

    /// Whether the supervisor task is currently alive.
    pub fn is_running(&self) -> bool {
        self.supervisor
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// Lock name this worker contends for.
    pub fn name(&self) -> &str {
        self.locker.name()
    }

    /// Owner id this worker presents to the backend.
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

    /// Current settings snapshot.
    pub fn settings(&self) -> LockSettings {
        self.locker.settings()
    }

    /// Replace the settings; the supervisor picks them up at the next
    /// state-machine edge.
    pub fn set_settings(&self, settings: LockSettings) {
        self.locker.set_settings(settings);
    }
}

impl Drop for LockedWorker {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            if !supervisor.handle.is_finished() {
                error!(
                    lock = %self.locker.name(),
                    "locked worker dropped while running; call stop() first"
                );
                if !std::thread::panicking() {
                    debug_assert!(false, "locked worker dropped while running; call stop() first");
                }
            }
            // Best-effort teardown; the detached supervisor still runs
            // the shielded release, so the lease does not leak.
            supervisor.cancel.cancel();
        }
    }
}
