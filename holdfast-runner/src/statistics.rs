use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Maximum number of lock-held duration samples retained.
///
/// When the window is full the oldest sample is evicted. Lock cycles
/// are infrequent compared to request traffic, so 1 000 samples covers
/// a long observation horizon while consuming ~8 KB.
const MAX_DURATION_SAMPLES: usize = 1_000;

/// Atomic counters tracking lock runner outcomes.
///
/// All counters use relaxed ordering for maximum throughput. For a
/// consistent point-in-time view, call [`snapshot`](Self::snapshot).
/// Counters are written by the supervisor and watchdog tasks and may be
/// read concurrently by observers.
#[derive(Debug, Default)]
pub struct LockerStatistics {
    /// Successful acquire calls, including watchdog renewals.
    pub acquire_successes: AtomicU64,
    /// Acquire calls that failed with a transient backend error.
    pub acquire_failures: AtomicU64,
    /// Acquire calls refused because another owner holds the lock.
    pub held_by_other: AtomicU64,
    /// Ownership cycles torn down by the watchdog (either signal).
    pub watchdog_triggered: AtomicU64,
    /// Watchdog teardowns caused by the local lease-TTL guard firing
    /// while the payload was still running.
    pub brain_splits: AtomicU64,
    /// Payload runs that returned an error or panicked (worker mode).
    pub payload_failures: AtomicU64,
    /// Release calls that returned an error (logged and swallowed).
    pub release_failures: AtomicU64,
    /// Rolling window of lock-held durations (microseconds).
    lock_durations: parking_lot::Mutex<VecDeque<u64>>,
}

impl LockerStatistics {
    /// Increment the successful-acquire counter.
    pub fn increment_acquire_successes(&self) {
        self.acquire_successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the failed-acquire counter.
    pub fn increment_acquire_failures(&self) {
        self.acquire_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the held-by-other counter.
    pub fn increment_held_by_other(&self) {
        self.held_by_other.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the watchdog-triggered counter.
    pub fn increment_watchdog_triggered(&self) {
        self.watchdog_triggered.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the brain-split counter.
    pub fn increment_brain_splits(&self) {
        self.brain_splits.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the payload-failure counter.
    pub fn increment_payload_failures(&self) {
        self.payload_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the release-failure counter.
    pub fn increment_release_failures(&self) {
        self.release_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long a finished ownership cycle held the lock.
    pub fn record_lock_duration(&self, held_for: Duration) {
        let us = u64::try_from(held_for.as_micros()).unwrap_or(u64::MAX);
        let mut window = self.lock_durations.lock();
        if window.len() >= MAX_DURATION_SAMPLES {
            window.pop_front();
        }
        window.push_back(us);
    }

    /// Take a consistent point-in-time snapshot of all counters and the
    /// duration percentiles.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let (p50, p95, p99) = self.compute_percentiles();
        StatisticsSnapshot {
            acquire_successes: self.acquire_successes.load(Ordering::Relaxed),
            acquire_failures: self.acquire_failures.load(Ordering::Relaxed),
            held_by_other: self.held_by_other.load(Ordering::Relaxed),
            watchdog_triggered: self.watchdog_triggered.load(Ordering::Relaxed),
            brain_splits: self.brain_splits.load(Ordering::Relaxed),
            payload_failures: self.payload_failures.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
            p50_lock_duration_ms: p50,
            p95_lock_duration_ms: p95,
            p99_lock_duration_ms: p99,
        }
    }

    fn compute_percentiles(&self) -> (f64, f64, f64) {
        let window = self.lock_durations.lock();
        if window.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let mut sorted: Vec<u64> = window.iter().copied().collect();
        sorted.sort_unstable();
        let len = sorted.len();
        (
            percentile_value(&sorted, len, 50.0),
            percentile_value(&sorted, len, 95.0),
            percentile_value(&sorted, len, 99.0),
        )
    }
}

/// Compute a percentile value from a sorted slice, converting
/// microseconds to milliseconds.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn percentile_value(sorted: &[u64], len: usize, pct: f64) -> f64 {
    let idx = ((pct / 100.0) * (len as f64 - 1.0)).round() as usize;
    let idx = idx.min(len - 1);
    sorted[idx] as f64 / 1_000.0
}

/// A plain data snapshot of [`LockerStatistics`] at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsSnapshot {
    /// Successful acquire calls, including watchdog renewals.
    pub acquire_successes: u64,
    /// Acquire calls that failed with a transient backend error.
    pub acquire_failures: u64,
    /// Acquire calls refused because another owner holds the lock.
    pub held_by_other: u64,
    /// Ownership cycles torn down by the watchdog.
    pub watchdog_triggered: u64,
    /// Local lease-TTL guard firings.
    pub brain_splits: u64,
    /// Payload runs that returned an error or panicked.
    pub payload_failures: u64,
    /// Release calls that returned an error.
    pub release_failures: u64,
    /// p50 lock-held duration in milliseconds.
    pub p50_lock_duration_ms: f64,
    /// p95 lock-held duration in milliseconds.
    pub p95_lock_duration_ms: f64,
    /// p99 lock-held duration in milliseconds.
    pub p99_lock_duration_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_statistics_are_zero() {
        let stats = LockerStatistics::default();
        let snap = stats.snapshot();
        assert_eq!(snap.acquire_successes, 0);
        assert_eq!(snap.acquire_failures, 0);
        assert_eq!(snap.held_by_other, 0);
        assert_eq!(snap.watchdog_triggered, 0);
        assert_eq!(snap.brain_splits, 0);
        assert_eq!(snap.payload_failures, 0);
        assert_eq!(snap.release_failures, 0);
        assert_eq!(snap.p50_lock_duration_ms, 0.0);
    }

    #[test]
    fn increment_and_snapshot() {
        let stats = LockerStatistics::default();
        stats.increment_acquire_successes();
        stats.increment_acquire_successes();
        stats.increment_acquire_failures();
        stats.increment_held_by_other();
        stats.increment_watchdog_triggered();
        stats.increment_brain_splits();
        stats.increment_payload_failures();
        stats.increment_release_failures();

        let snap = stats.snapshot();
        assert_eq!(snap.acquire_successes, 2);
        assert_eq!(snap.acquire_failures, 1);
        assert_eq!(snap.held_by_other, 1);
        assert_eq!(snap.watchdog_triggered, 1);
        assert_eq!(snap.brain_splits, 1);
        assert_eq!(snap.payload_failures, 1);
        assert_eq!(snap.release_failures, 1);
    }

    #[test]
    fn duration_percentiles() {
        let stats = LockerStatistics::default();
        // 1ms .. 100ms
        for i in 1..=100u64 {
            stats.record_lock_duration(Duration::from_millis(i));
        }
        let snap = stats.snapshot();
        assert!((snap.p50_lock_duration_ms - 50.0).abs() < 2.0);
        assert!((snap.p95_lock_duration_ms - 95.0).abs() < 2.0);
        assert!((snap.p99_lock_duration_ms - 99.0).abs() < 2.0);
    }

    #[test]
    fn duration_window_is_bounded() {
        let stats = LockerStatistics::default();
        for i in 0..(MAX_DURATION_SAMPLES + 500) {
            stats.record_lock_duration(Duration::from_micros(i as u64));
        }
        let window = stats.lock_durations.lock();
        assert_eq!(window.len(), MAX_DURATION_SAMPLES);
        // Oldest samples were evicted.
        assert_eq!(window.front().copied(), Some(500));
    }

    #[test]
    fn snapshot_is_isolated_from_later_updates() {
        let stats = LockerStatistics::default();
        stats.increment_acquire_successes();
        let snap = stats.snapshot();
        stats.increment_acquire_successes();
        assert_eq!(snap.acquire_successes, 1);
        assert_eq!(stats.snapshot().acquire_successes, 2);
    }
}
