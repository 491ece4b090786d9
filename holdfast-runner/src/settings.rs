use std::time::Duration;

use serde::Deserialize;

/// Timing knobs for a lock runner.
///
/// All five knobs are independent. `acquire_interval` paces probing
/// while the lock is contested or idle; `acquire_backoff` paces retries
/// after a transient backend failure; the two are distinct because the
/// state machine branches differently on the two outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSettings {
    /// Delay between acquisition attempts while the lock is held by
    /// another owner.
    pub acquire_interval: Duration,
    /// Delay before re-probing after a transient backend failure.
    pub acquire_backoff: Duration,
    /// Cadence at which the watchdog renews the held lease.
    pub prolong_interval: Duration,
    /// Lease duration requested from the backend on every acquire.
    pub lock_ttl: Duration,
    /// Pause between payload runs in worker mode.
    pub worker_restart_delay: Duration,
}

impl LockSettings {
    /// Whether the watchdog can renew the lease before it expires.
    ///
    /// When this is `false` the watchdog's local TTL guard will fire on
    /// every ownership cycle; a warning is logged when such a cycle
    /// starts.
    pub fn renewable(&self) -> bool {
        self.prolong_interval < self.lock_ttl
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        LockSettingsConfig::default().into()
    }
}

/// Deserializable form of [`LockSettings`] with millisecond-valued,
/// kebab-case keys (`acquire-interval-ms`, `lock-ttl-ms`, ...).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LockSettingsConfig {
    /// Idle wait between acquisition attempts when contested (ms).
    #[serde(default = "default_acquire_interval_ms")]
    pub acquire_interval_ms: u64,
    /// Wait after a non-contention acquire failure (ms).
    #[serde(default = "default_acquire_backoff_ms")]
    pub acquire_backoff_ms: u64,
    /// Watchdog renewal cadence (ms). Must be below `lock-ttl-ms` for
    /// the lease to be renewable.
    #[serde(default = "default_prolong_interval_ms")]
    pub prolong_interval_ms: u64,
    /// Lease duration passed to the backend (ms).
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,
    /// Pause between payload runs in worker mode (ms).
    #[serde(default = "default_worker_restart_delay_ms")]
    pub worker_restart_delay_ms: u64,
}

impl Default for LockSettingsConfig {
    fn default() -> Self {
        Self {
            acquire_interval_ms: default_acquire_interval_ms(),
            acquire_backoff_ms: default_acquire_backoff_ms(),
            prolong_interval_ms: default_prolong_interval_ms(),
            lock_ttl_ms: default_lock_ttl_ms(),
            worker_restart_delay_ms: default_worker_restart_delay_ms(),
        }
    }
}

impl From<LockSettingsConfig> for LockSettings {
    fn from(config: LockSettingsConfig) -> Self {
        Self {
            acquire_interval: Duration::from_millis(config.acquire_interval_ms),
            acquire_backoff: Duration::from_millis(config.acquire_backoff_ms),
            prolong_interval: Duration::from_millis(config.prolong_interval_ms),
            lock_ttl: Duration::from_millis(config.lock_ttl_ms),
            worker_restart_delay: Duration::from_millis(config.worker_restart_delay_ms),
        }
    }
}

fn default_acquire_interval_ms() -> u64 {
    1_000
}

fn default_acquire_backoff_ms() -> u64 {
    5_000
}

fn default_prolong_interval_ms() -> u64 {
    10_000
}

fn default_lock_ttl_ms() -> u64 {
    30_000
}

fn default_worker_restart_delay_ms() -> u64 {
    1_000
}
