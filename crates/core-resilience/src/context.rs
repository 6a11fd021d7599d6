//! Cooperative cancellation for queue and retry operations
//!
//! A [`Context`] travels with every call into this crate. It combines an
//! explicit cancellation token with an optional deadline, so callers can
//! express both "shut down now" and "give up after this long" with one value.
//!
//! Nothing here blocks: [`Context::err`] is a non-blocking check used before
//! state mutation, and [`Context::done`] is the future suspension points
//! select on.
//!
//! # Example
//!
//! ```
//! use aigate_core_resilience::context::{Context, ContextError};
//!
//! let ctx = Context::new();
//! assert!(ctx.err().is_none());
//!
//! ctx.cancel();
//! assert_eq!(ctx.err(), Some(ContextError::Cancelled));
//! ```

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context is done
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The context was explicitly cancelled
    #[error("context cancelled")]
    Cancelled,

    /// The context deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation token plus optional deadline
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is only done once [`Context::cancel`] is called
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token (e.g. a service-wide shutdown token)
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a context that additionally expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that additionally expires at `deadline`.
    ///
    /// The earlier of the existing and the new deadline wins. Cancelling
    /// `self` also cancels the derived context, but not the other way round.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Derive a context that can be cancelled independently of `self`
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and every context derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The underlying cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check. Cancellation takes precedence over the deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Whether the context is done for any reason
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => ContextError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_live() {
        let ctx = Context::new();
        assert!(ctx.err().is_none());
        assert!(!ctx.is_done());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_cancel_propagates_to_derived() {
        let parent = Context::new();
        let child = parent.child();
        let timed = parent.with_timeout(Duration::from_secs(60));

        parent.cancel();

        assert_eq!(child.err(), Some(ContextError::Cancelled));
        assert_eq!(timed.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = Context::new();
        let child = parent.child();

        child.cancel();

        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = Context::new().with_timeout(Duration::from_millis(50));
        assert!(ctx.err().is_none());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_deadline_wins() {
        let outer = Context::new().with_timeout(Duration::from_millis(100));
        let inner = outer.with_timeout(Duration::from_secs(10));

        assert_eq!(inner.deadline(), outer.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_resolves_on_deadline() {
        let ctx = Context::new().with_timeout(Duration::from_millis(30));
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_done_resolves_on_cancel() {
        let ctx = Context::new();
        let remote = ctx.clone();

        tokio::spawn(async move {
            tokio::task::yield_now().await;
            remote.cancel();
        });

        assert_eq!(ctx.done().await, ContextError::Cancelled);
    }

    #[test]
    fn test_cancel_wins_over_deadline() {
        let ctx = Context::new().with_deadline(Instant::now());
        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn test_done_pending_until_cancelled() {
        use tokio_test::{assert_pending, assert_ready_eq, task};

        let ctx = Context::new();
        let mut done = task::spawn(ctx.done());

        assert_pending!(done.poll());
        ctx.cancel();
        assert!(done.is_woken());
        assert_ready_eq!(done.poll(), ContextError::Cancelled);
    }
}
