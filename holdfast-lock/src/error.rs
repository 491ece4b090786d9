use thiserror::Error;

/// Errors from lock backend operations.
///
/// The two variants are deliberately distinct: contention drives the
/// runner's state machine differently from a transient failure, so
/// backends must not collapse them into one.
#[derive(Debug, Error)]
pub enum LockError {
    /// The backend reports that another owner currently holds the lock.
    #[error("lock is held by another owner")]
    HeldByOther,

    /// Any other backend condition; the caller may retry.
    #[error("backend error: {0}")]
    Backend(String),
}

impl LockError {
    /// `true` when this error is an authoritative contention response.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::HeldByOther)
    }
}
