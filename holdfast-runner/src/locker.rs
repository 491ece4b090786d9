use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use holdfast_lock::{LockError, LockStrategy};

use crate::error::{PayloadError, RunError};
use crate::settings::LockSettings;
use crate::statistics::{LockerStatistics, StatisticsSnapshot};

/// Future returned by one payload invocation.
pub type PayloadFuture = BoxFuture<'static, Result<(), PayloadError>>;

/// Factory invoked once per ownership cycle to produce the payload
/// future. The payload receives a token it is expected to honor at its
/// own suspension points; it may instead ignore the token and complete
/// naturally.
pub(crate) type PayloadFn = Arc<dyn Fn(CancellationToken) -> PayloadFuture + Send + Sync>;

/// How the supervisor behaves once the payload has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockerMode {
    /// Run the payload once, then terminate.
    Oneshot,
    /// Re-acquire the lock and re-run the payload indefinitely.
    Worker,
}

/// Behavior when the lock is currently held by another owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitingMode {
    /// Keep probing until the lock becomes free.
    Wait,
    /// Terminate after the first contested attempt; the payload never
    /// ran, which is a legitimate outcome rather than an error.
    NoWait,
}

/// Behavior after a transient acquisition failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    /// Back off and retry indefinitely.
    Retry,
    /// Propagate the first transient failure out of the run.
    SingleAttempt,
}

/// Why the watchdog tore a LOCKED cycle down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchdogVerdict {
    /// The backend authoritatively reported a different owner.
    HeldByOther,
    /// The local TTL guard fired: the lease could not be proven fresh.
    LeaseExpired,
}

/// How a LOCKED cycle ended.
enum CycleEnd {
    PayloadCompleted,
    PayloadFailed(PayloadError),
    PayloadPanicked,
    LeaseLost,
    Cancelled,
}

/// Lock ownership state observable from outside the supervisor.
///
/// Timestamps are microseconds relative to the per-locker `epoch` so
/// they fit in an atomic word. Written by the supervisor and watchdog
/// only; read lock-free by observers.
#[derive(Debug)]
struct LockState {
    epoch: Instant,
    is_locked: AtomicBool,
    acquire_us: AtomicU64,
    refresh_us: AtomicU64,
}

impl LockState {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            is_locked: AtomicBool::new(false),
            acquire_us: AtomicU64::new(0),
            refresh_us: AtomicU64::new(0),
        }
    }

    fn now_us(&self) -> u64 {
        u64::try_from(Instant::now().duration_since(self.epoch).as_micros()).unwrap_or(u64::MAX)
    }

    fn mark_locked(&self) {
        let now = self.now_us();
        self.acquire_us.store(now, Ordering::Relaxed);
        self.refresh_us.store(now, Ordering::Relaxed);
        self.is_locked.store(true, Ordering::Relaxed);
    }

    fn mark_refreshed(&self) {
        self.refresh_us.store(self.now_us(), Ordering::Relaxed);
    }

    fn mark_unlocked(&self) {
        self.is_locked.store(false, Ordering::Relaxed);
        self.acquire_us.store(0, Ordering::Relaxed);
        self.refresh_us.store(0, Ordering::Relaxed);
    }

    /// Time since the lease was last proven fresh.
    fn refresh_age(&self) -> Duration {
        let age = self
            .now_us()
            .saturating_sub(self.refresh_us.load(Ordering::Relaxed));
        Duration::from_micros(age)
    }

    /// Span between first acquisition and the latest proven refresh,
    /// while locked.
    fn locked_duration(&self) -> Option<Duration> {
        if !self.is_locked.load(Ordering::Relaxed) {
            return None;
        }
        let acquire = self.acquire_us.load(Ordering::Relaxed);
        let refresh = self.refresh_us.load(Ordering::Relaxed);
        Some(Duration::from_micros(refresh.saturating_sub(acquire)))
    }

    /// Total time the current lease has been held so far.
    fn held_for(&self) -> Option<Duration> {
        if !self.is_locked.load(Ordering::Relaxed) {
            return None;
        }
        let acquire = self.acquire_us.load(Ordering::Relaxed);
        Some(Duration::from_micros(self.now_us().saturating_sub(acquire)))
    }
}

/// Acquisition supervisor: probes the backend, renews the lease from a
/// watchdog child task, and supervises the payload while locked.
pub(crate) struct Locker {
    name: String,
    id: String,
    strategy: Arc<dyn LockStrategy>,
    payload: PayloadFn,
    retry_mode: RetryMode,
    settings: parking_lot::Mutex<LockSettings>,
    state: LockState,
    stats: LockerStatistics,
}

impl Locker {
    pub(crate) fn new(
        name: impl Into<String>,
        strategy: Arc<dyn LockStrategy>,
        settings: LockSettings,
        payload: PayloadFn,
        retry_mode: RetryMode,
    ) -> Self {
        Self {
            name: name.into(),
            id: generate_owner_id(),
            strategy,
            payload,
            retry_mode,
            settings: parking_lot::Mutex::new(settings),
            state: LockState::new(),
            stats: LockerStatistics::default(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn settings(&self) -> LockSettings {
        self.settings.lock().clone()
    }

    pub(crate) fn set_settings(&self, settings: LockSettings) {
        *self.settings.lock() = settings;
    }

    pub(crate) fn locked_duration(&self) -> Option<Duration> {
        self.state.locked_duration()
    }

    pub(crate) fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    /// Drive the UNLOCKED/LOCKED state machine until the run terminates.
    ///
    /// The caller cancels `cancel` to tear the whole construct down; the
    /// final release is never raced against that cancellation, so a
    /// cancelled run cannot leak a lease.
    pub(crate) async fn run(
        self: Arc<Self>,
        mode: LockerMode,
        waiting_mode: WaitingMode,
        cancel: CancellationToken,
    ) -> Result<(), RunError> {
        debug!(lock = %self.name, id = %self.id, ?mode, "lock runner started");

        loop {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            // Settings snapshot per state-machine edge; live mutation is
            // not observed mid-step.
            let settings = self.settings();

            match self.strategy.acquire(settings.lock_ttl, &self.id).await {
                Ok(()) => {
                    self.stats.increment_acquire_successes();
                    match self.locked_cycle(&settings, &cancel).await {
                        CycleEnd::PayloadCompleted => match mode {
                            LockerMode::Oneshot => return Ok(()),
                            LockerMode::Worker => {
                                debug!(lock = %self.name, "payload finished; restarting after delay");
                                if pause(settings.worker_restart_delay, &cancel).await {
                                    return Err(RunError::Cancelled);
                                }
                            }
                        },
                        CycleEnd::PayloadFailed(err) => match mode {
                            LockerMode::Oneshot => return Err(RunError::Payload(err)),
                            LockerMode::Worker => {
                                self.stats.increment_payload_failures();
                                warn!(lock = %self.name, error = %err, "payload failed; restarting after delay");
                                if pause(settings.worker_restart_delay, &cancel).await {
                                    return Err(RunError::Cancelled);
                                }
                            }
                        },
                        CycleEnd::PayloadPanicked => match mode {
                            LockerMode::Oneshot => return Err(RunError::PayloadPanic),
                            LockerMode::Worker => {
                                self.stats.increment_payload_failures();
                                warn!(lock = %self.name, "payload panicked; restarting after delay");
                                if pause(settings.worker_restart_delay, &cancel).await {
                                    return Err(RunError::Cancelled);
                                }
                            }
                        },
                        CycleEnd::LeaseLost => {
                            if self.retry_mode == RetryMode::SingleAttempt {
                                return Err(RunError::LeaseLost);
                            }
                            // Re-enter the acquisition loop right away;
                            // a contested or failing backend paces the
                            // retries below.
                        }
                        CycleEnd::Cancelled => return Err(RunError::Cancelled),
                    }
                }
                Err(LockError::HeldByOther) => {
                    self.stats.increment_held_by_other();
                    debug!(lock = %self.name, "lock is held by another owner");
                    if waiting_mode == WaitingMode::NoWait {
                        info!(lock = %self.name, "lock is contested; not waiting");
                        return Ok(());
                    }
                    if pause(settings.acquire_interval, &cancel).await {
                        return Err(RunError::Cancelled);
                    }
                }
                Err(err) => {
                    self.stats.increment_acquire_failures();
                    warn!(lock = %self.name, error = %err, "lock acquisition attempt failed");
                    if self.retry_mode == RetryMode::SingleAttempt {
                        return Err(RunError::Acquire(err));
                    }
                    if pause(settings.acquire_backoff, &cancel).await {
                        return Err(RunError::Cancelled);
                    }
                }
            }
        }
    }

    /// One LOCKED cycle: spawn the watchdog and the payload, wait for
    /// the first of payload completion, watchdog verdict, or external
    /// cancellation, then join the children and release.
    async fn locked_cycle(
        self: &Arc<Self>,
        settings: &LockSettings,
        cancel: &CancellationToken,
    ) -> CycleEnd {
        self.state.mark_locked();
        info!(lock = %self.name, id = %self.id, "lock acquired");

        let watchdog_cancel = cancel.child_token();
        let payload_cancel = cancel.child_token();

        let mut watchdog_task = tokio::spawn(
            Arc::clone(self)
                .watchdog(settings.clone(), watchdog_cancel.clone())
                .instrument(info_span!("watchdog", lock = %self.name)),
        );
        // The payload starts strictly after the locked state became
        // observable and after the watchdog is in place.
        let mut payload_task = tokio::spawn(
            (self.payload)(payload_cancel.clone()).instrument(info_span!("payload", lock = %self.name)),
        );

        let end = tokio::select! {
            res = &mut payload_task => {
                watchdog_cancel.cancel();
                let _ = watchdog_task.await;
                match res {
                    Ok(Ok(())) => CycleEnd::PayloadCompleted,
                    Ok(Err(err)) => CycleEnd::PayloadFailed(err),
                    Err(_) => CycleEnd::PayloadPanicked,
                }
            }
            verdict = &mut watchdog_task => {
                payload_cancel.cancel();
                // The payload's result is not interpreted once it has
                // been asked to stop.
                let _ = payload_task.await;
                match verdict {
                    Ok(Some(WatchdogVerdict::HeldByOther)) => {
                        self.stats.increment_watchdog_triggered();
                        info!(lock = %self.name, "lock was taken over by another owner");
                        CycleEnd::LeaseLost
                    }
                    Ok(Some(WatchdogVerdict::LeaseExpired)) => {
                        self.stats.increment_watchdog_triggered();
                        self.stats.increment_brain_splits();
                        warn!(lock = %self.name, "lease expired locally before renewal; cancelling the payload");
                        CycleEnd::LeaseLost
                    }
                    _ => {
                        if cancel.is_cancelled() {
                            CycleEnd::Cancelled
                        } else {
                            CycleEnd::LeaseLost
                        }
                    }
                }
            }
            () = cancel.cancelled() => {
                // Child tokens fire with the parent; just join.
                let _ = payload_task.await;
                let _ = watchdog_task.await;
                CycleEnd::Cancelled
            }
        };

        // Release shield: both children have joined and nothing races
        // this call against cancellation, so a cancelled run still
        // releases the lease.
        if let Err(err) = self.strategy.release(&self.id).await {
            self.stats.increment_release_failures();
            warn!(lock = %self.name, error = %err, "lock release failed");
        }
        if let Some(held_for) = self.state.held_for() {
            self.stats.record_lock_duration(held_for);
        }
        self.state.mark_unlocked();
        info!(lock = %self.name, "lock released");

        end
    }

    /// Lease renewal loop; exits with a verdict when the lease is lost,
    /// or silently on cancellation.
    async fn watchdog(
        self: Arc<Self>,
        settings: LockSettings,
        cancel: CancellationToken,
    ) -> Option<WatchdogVerdict> {
        if !settings.renewable() {
            warn!(
                lock = %self.name,
                prolong_interval = ?settings.prolong_interval,
                lock_ttl = ?settings.lock_ttl,
                "renewal cadence is not shorter than the lease TTL; the lease cannot be kept alive"
            );
        }

        loop {
            if pause(settings.prolong_interval, &cancel).await {
                return None;
            }
            // Tested before the renewal attempt so that a late renewal
            // cannot mask a lease that has already run out locally.
            if self.state.refresh_age() >= settings.lock_ttl {
                return Some(WatchdogVerdict::LeaseExpired);
            }
            match self.strategy.acquire(settings.lock_ttl, &self.id).await {
                Ok(()) => {
                    self.state.mark_refreshed();
                    self.stats.increment_acquire_successes();
                    debug!(lock = %self.name, "lease renewed");
                }
                Err(LockError::HeldByOther) => {
                    self.stats.increment_held_by_other();
                    return Some(WatchdogVerdict::HeldByOther);
                }
                Err(err) => {
                    self.stats.increment_acquire_failures();
                    debug!(lock = %self.name, error = %err, "lease renewal failed; will retry");
                }
            }
        }
    }
}

/// Sleep for `duration`, returning early when `cancel` fires.
/// Returns `true` when the sleep was interrupted by cancellation.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(duration) => false,
    }
}

/// Stable owner id for this locker instance: host plus a random suffix,
/// unique for the lifetime of the process.
fn generate_owner_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_owned());
    format!("{host}:{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_ids_are_unique_and_non_empty() {
        let first = generate_owner_id();
        let second = generate_owner_id();
        assert!(!first.is_empty());
        assert_ne!(first, second);
        assert!(first.contains(':'));
    }

    #[tokio::test]
    async fn pause_completes_without_cancellation() {
        let cancel = CancellationToken::new();
        assert!(!pause(Duration::from_millis(1), &cancel).await);
    }

    #[tokio::test]
    async fn pause_returns_early_on_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(pause(Duration::from_secs(3_600), &cancel).await);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_state_tracks_refresh_age() {
        let state = LockState::new();
        state.mark_locked();
        assert_eq!(state.locked_duration(), Some(Duration::ZERO));

        tokio::time::advance(Duration::from_millis(40)).await;
        assert!(state.refresh_age() >= Duration::from_millis(40));

        state.mark_refreshed();
        assert!(state.refresh_age() < Duration::from_millis(1));
        assert!(state.locked_duration().unwrap() >= Duration::from_millis(40));

        state.mark_unlocked();
        assert_eq!(state.locked_duration(), None);
        assert_eq!(state.held_for(), None);
    }
}
