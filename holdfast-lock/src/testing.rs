//! Conformance suite for [`LockStrategy`] implementations.
//!
//! Backend crates call [`run_strategy_conformance_tests`] from their own
//! tests to verify the acquire/renew/release laws every backend must
//! uphold: same-owner re-acquire is a renewal, contention is reported as
//! [`LockError::HeldByOther`], and releasing an unheld or foreign-held
//! lock is a no-op.

use std::time::Duration;

use crate::error::LockError;
use crate::strategy::LockStrategy;

const TTL: Duration = Duration::from_secs(30);

/// Run the conformance suite against `strategy`.
///
/// The strategy must start with the lock unheld and must be otherwise
/// idle for the duration of the run. Returns a description of the first
/// violated law.
///
/// # Errors
///
/// Returns `Err` with a human-readable description when any law fails.
pub async fn run_strategy_conformance_tests<S: LockStrategy>(strategy: &S) -> Result<(), String> {
    // Fresh acquire from the unheld state.
    strategy
        .acquire(TTL, "conformance-a")
        .await
        .map_err(|e| format!("initial acquire should succeed: {e}"))?;

    // Re-acquire by the same owner is a renewal, not a conflict.
    strategy
        .acquire(TTL, "conformance-a")
        .await
        .map_err(|e| format!("same-owner re-acquire should renew: {e}"))?;

    // A different owner is refused with the contention variant.
    match strategy.acquire(TTL, "conformance-b").await {
        Err(LockError::HeldByOther) => {}
        Err(other) => {
            return Err(format!(
                "contending acquire should report HeldByOther, got: {other}"
            ));
        }
        Ok(()) => return Err("contending acquire should fail while held".into()),
    }

    // Releasing someone else's lock is a no-op; the holder keeps it.
    strategy
        .release("conformance-b")
        .await
        .map_err(|e| format!("foreign release should be a no-op: {e}"))?;
    match strategy.acquire(TTL, "conformance-b").await {
        Err(LockError::HeldByOther) => {}
        _ => return Err("foreign release must not evict the holder".into()),
    }

    // The holder can release, after which the lock is free for others.
    strategy
        .release("conformance-a")
        .await
        .map_err(|e| format!("holder release should succeed: {e}"))?;
    strategy
        .acquire(TTL, "conformance-b")
        .await
        .map_err(|e| format!("acquire after release should succeed: {e}"))?;
    strategy
        .release("conformance-b")
        .await
        .map_err(|e| format!("cleanup release should succeed: {e}"))?;

    // Releasing an unheld lock is a no-op.
    strategy
        .release("conformance-a")
        .await
        .map_err(|e| format!("unheld release should be a no-op: {e}"))?;

    Ok(())
}
