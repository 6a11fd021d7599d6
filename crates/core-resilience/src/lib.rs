//! aigate Core Resilience: admission control and retry for a flaky inference backend
//!
//! # Overview
//!
//! This crate provides the two building blocks that mediate access to a slow,
//! occasionally failing AI inference service:
//!
//! - **Admission Queue**: A capacity-bounded FIFO that accepts requests, serves
//!   them oldest first and tracks each request's lifecycle until its outcome is
//!   recorded
//! - **Retry Executor**: A stateless strategy that re-runs any fallible async
//!   operation with exponential backoff, jitter and a delay cap, stopping early
//!   when the caller's context is cancelled
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - HTTP routing, persistence or configuration files
//! - What the inference backend is or how it is called
//!
//! The queue never invokes the executor. Composition is the caller's job:
//!
//! ```text
//!   producer ──admit──► ┌──────────────────┐
//!                       │  Admission Queue │  ← backpressure (QueueFull)
//!   consumer ◄──take─── └──────────────────┘
//!       │
//!       ▼
//!   ┌──────────────────┐
//!   │  Retry Executor  │  ← backoff, jitter, cancellation
//!   └────────┬─────────┘
//!            ▼
//!     Inference Backend
//!            │
//!            ▼
//!   complete / fail ──► Admission Queue (status + response)
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use aigate_core_resilience::prelude::*;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), QueueError> {
//! let queue = FifoQueue::new(100);
//! let retry = ExponentialBackoff::new(RetryConfig::default());
//! let ctx = Context::new();
//!
//! queue.admit(&ctx, Request::new("req-1", "preview", "fn main() {}"))?;
//!
//! if let Some(request) = queue.take(&ctx)? {
//!     let started = std::time::Instant::now();
//!     match retry
//!         .execute_with_retry(&ctx, |_ctx| async { Ok::<_, String>(serde_json::json!("ok")) })
//!         .await
//!     {
//!         Ok(result) => queue.complete(
//!             &ctx,
//!             &request.id,
//!             Response::new(&request.id, result, started.elapsed()),
//!         )?,
//!         Err(e) => queue.fail(
//!             &ctx,
//!             &request.id,
//!             Response::new(&request.id, serde_json::json!({ "error": e.to_string() }), Duration::ZERO),
//!         )?,
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod queue;
pub mod retry;
pub mod types;

// Re-export main types for convenience
pub use context::{Context, ContextError};
pub use error::{QueueError, RetryError};
pub use queue::{AdmissionQueue, FifoQueue, DEFAULT_CAPACITY};
pub use retry::{ExponentialBackoff, RetryConfig, RetryStrategy};
pub use types::{Request, RequestState, RequestStatus, Response};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use aigate_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::context::{Context, ContextError};
    pub use super::error::{QueueError, RetryError};
    pub use super::queue::{AdmissionQueue, FifoQueue};
    pub use super::retry::{ExponentialBackoff, RetryConfig, RetryStrategy};
    pub use super::types::{Request, RequestState, RequestStatus, Response};
}
