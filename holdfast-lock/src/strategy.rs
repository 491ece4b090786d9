use std::time::Duration;

use async_trait::async_trait;

use crate::error::LockError;

/// Trait for backend-specific lease acquisition.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// The runner identifies itself with an opaque non-empty `owner_id` on
/// every call so the backend can tell self-renewal apart from foreign
/// contention.
#[async_trait]
pub trait LockStrategy: Send + Sync {
    /// Acquire or renew the lease for `owner_id` with duration `ttl`.
    ///
    /// A successful return means the lease is held for up to `ttl`,
    /// counted from the start of the call. Calling `acquire` while
    /// already the holder must renew the lease rather than fail; this is
    /// the renewal path and must be idempotent for the same `owner_id`.
    ///
    /// # Errors
    ///
    /// [`LockError::HeldByOther`] when another owner holds the lock;
    /// [`LockError::Backend`] for transient or unknown conditions.
    ///
    /// # Panics
    ///
    /// Implementations reject an empty `owner_id` as a programmer error.
    async fn acquire(&self, ttl: Duration, owner_id: &str) -> Result<(), LockError>;

    /// Best-effort release of the lease held by `owner_id`.
    ///
    /// Releasing a lock that is unheld, expired, or held by a different
    /// owner is a no-op. Callers are expected to log and ignore errors.
    async fn release(&self, owner_id: &str) -> Result<(), LockError>;
}
