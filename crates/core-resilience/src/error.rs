//! Error types for queue and retry operations

use crate::context::ContextError;
use thiserror::Error;

/// Errors reported by an admission queue. None of them is retried internally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Pending list is at capacity; the caller should apply backpressure
    #[error("queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Malformed call, always a caller bug
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No record exists for this identifier
    #[error("request not found: {0}")]
    NotFound(String),

    /// A record for this identifier already exists
    #[error("duplicate request id: {0}")]
    DuplicateRequest(String),

    /// The caller's context was done before the call could apply
    #[error("operation cancelled: {0}")]
    Cancelled(#[from] ContextError),
}

impl QueueError {
    /// Check if this error came from cancellation or a deadline
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueueError::Cancelled(_))
    }

    /// Check if waiting and submitting again may succeed
    pub fn is_retryable_admission(&self) -> bool {
        matches!(self, QueueError::QueueFull { .. })
    }
}

/// Outcome of a retried operation that did not succeed
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error the operation returned
    #[error("all {attempts} attempts failed: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    /// The context was done before or during an attempt's backoff
    #[error("retry cancelled after {attempts} attempts: {reason}")]
    Cancelled {
        attempts: u32,
        reason: ContextError,
        during_backoff: bool,
    },
}

impl<E> RetryError<E> {
    /// Check if the executor gave up because of cancellation rather than failures
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    /// Number of operation invocations made
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The operation's own error, if the budget was exhausted
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            RetryError::Cancelled { .. } => None,
        }
    }

    /// Borrowing variant of [`RetryError::into_operation_error`]
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            RetryError::Cancelled { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_error_classification() {
        let full = QueueError::QueueFull { capacity: 3 };
        assert!(full.is_retryable_admission());
        assert!(!full.is_cancelled());

        let cancelled: QueueError = ContextError::Cancelled.into();
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_retryable_admission());

        assert!(!QueueError::NotFound("x".into()).is_retryable_admission());
    }

    #[test]
    fn test_retry_error_surfaces_operation_error() {
        let err: RetryError<String> = RetryError::Exhausted {
            attempts: 2,
            last_error: "backend down".to_string(),
        };
        assert!(!err.is_cancelled());
        assert_eq!(err.attempts(), 2);
        assert_eq!(err.to_string(), "all 2 attempts failed: backend down");
        assert_eq!(err.into_operation_error().as_deref(), Some("backend down"));
    }

    #[test]
    fn test_retry_error_cancelled_has_no_operation_error() {
        let err: RetryError<String> = RetryError::Cancelled {
            attempts: 1,
            reason: ContextError::DeadlineExceeded,
            during_backoff: true,
        };
        assert!(err.is_cancelled());
        assert!(err.operation_error().is_none());
    }
}
