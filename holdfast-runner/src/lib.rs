//! Distributed lock runner.
//!
//! Given a pluggable lease backend (a [`holdfast_lock::LockStrategy`]),
//! the runner continuously tries to hold a named lock on behalf of this
//! process and, while the lock is held, runs a user-supplied payload.
//! A watchdog task renews the lease and forcibly cancels the payload
//! when renewal cannot be proven in time, so at most one holder runs the
//! payload across the cluster (modulo backend correctness).
//!
//! Two façades are provided:
//!
//! - [`LockedWorker`] runs indefinitely, restarting the payload after
//!   each ownership cycle, until [`LockedWorker::stop`] is called.
//! - [`LockedTask`] runs the payload at most once and completes when the
//!   payload completes or acquisition is abandoned.

mod locker;

pub mod error;
pub mod settings;
pub mod statistics;
pub mod task;
pub mod worker;

pub use error::{PayloadError, RunError};
pub use locker::{PayloadFuture, RetryMode, WaitingMode};
pub use settings::{LockSettings, LockSettingsConfig};
pub use statistics::{LockerStatistics, StatisticsSnapshot};
pub use task::{LockedTask, TaskState};
pub use worker::LockedWorker;
