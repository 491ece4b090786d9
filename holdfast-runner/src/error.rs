use thiserror::Error;

use holdfast_lock::LockError;

/// Error type produced by a payload closure.
pub type PayloadError = Box<dyn std::error::Error + Send + Sync>;

/// Terminal outcome of a run that did not end with a completed payload.
///
/// Contention, transient backend failures, and lease loss in retrying
/// modes are recovered inside the supervisor and never escape.
#[derive(Debug, Error)]
pub enum RunError {
    /// A single-attempt acquisition failed with a non-contention error.
    #[error("lock acquisition failed: {0}")]
    Acquire(#[source] LockError),

    /// The payload returned an error (oneshot mode).
    #[error("payload failed: {0}")]
    Payload(#[source] PayloadError),

    /// The payload task panicked (oneshot mode).
    #[error("payload panicked")]
    PayloadPanic,

    /// The lease was lost before the payload completed and the retry
    /// mode forbids re-acquisition.
    #[error("lease lost before the payload completed")]
    LeaseLost,

    /// The run was cancelled before the payload completed.
    #[error("run cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_error_display_preserves_message() {
        let inner: PayloadError = "123".into();
        let err = RunError::Payload(inner);
        assert_eq!(err.to_string(), "payload failed: 123");
    }

    #[test]
    fn acquire_error_carries_the_backend_detail() {
        let err = RunError::Acquire(LockError::Backend("not allowed".into()));
        assert_eq!(
            err.to_string(),
            "lock acquisition failed: backend error: not allowed"
        );
    }
}
