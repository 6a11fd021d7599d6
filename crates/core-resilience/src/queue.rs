//! Admission Queue: bounded FIFO with per-request lifecycle tracking
//!
//! Producers [`admit`](AdmissionQueue::admit) requests, consumers
//! [`take`](AdmissionQueue::take) them oldest first, and whoever finishes a
//! request records the outcome with [`complete`](AdmissionQueue::complete) or
//! [`fail`](AdmissionQueue::fail). Every operation returns immediately: a full
//! queue is reported as [`QueueError::QueueFull`], an empty one as `None`.
//!
//! ```text
//!   admit ──► [queued] ──take──► [processing] ──complete──► [complete]
//!                                      │
//!                                      └──────fail────────► [failed]
//! ```
//!
//! # Retention
//!
//! Status and response records outlive the pending list: they stay until
//! [`FifoQueue::prune_finished`] drops terminal records older than a given
//! age. Without pruning the maps grow with every request ever admitted.
//!
//! # Example
//!
//! ```
//! use aigate_core_resilience::{AdmissionQueue, Context, FifoQueue, Request, RequestState};
//!
//! let queue = FifoQueue::new(2);
//! let ctx = Context::new();
//!
//! queue.admit(&ctx, Request::new("req-1", "preview", "code")).unwrap();
//! assert_eq!(queue.size(), 1);
//!
//! let req = queue.take(&ctx).unwrap().expect("one pending request");
//! assert_eq!(req.id, "req-1");
//! assert_eq!(queue.status(&ctx, "req-1").unwrap().state, RequestState::Processing);
//! ```

use crate::context::Context;
use crate::error::QueueError;
use crate::types::{Request, RequestState, RequestStatus, Response};
use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Capacity used when zero is requested
pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded, non-blocking FIFO admission contract.
///
/// Implementations must serialize mutations, never block waiting for work or
/// capacity, and check the context before applying any change.
pub trait AdmissionQueue: Send + Sync {
    /// Append a request to the tail. Fails with `QueueFull` at capacity.
    fn admit(&self, ctx: &Context, request: Request) -> Result<(), QueueError>;

    /// Remove the oldest pending request, or `None` when there is none
    fn take(&self, ctx: &Context) -> Result<Option<Request>, QueueError>;

    /// Record a successful result for a taken request.
    ///
    /// Ids that were never admitted, or are still queued, are rejected with
    /// `InvalidArgument`. A finished record is overwritten.
    fn complete(
        &self,
        ctx: &Context,
        request_id: &str,
        response: Response,
    ) -> Result<(), QueueError>;

    /// Record a permanent failure for a taken request. Same rules as `complete`.
    fn fail(&self, ctx: &Context, request_id: &str, response: Response) -> Result<(), QueueError>;

    /// Current status of an admitted request
    fn status(&self, ctx: &Context, request_id: &str) -> Result<RequestStatus, QueueError>;

    /// Number of requests admitted but not yet taken
    fn size(&self) -> usize;
}

#[derive(Debug)]
struct StatusRecord {
    state: RequestState,
    updated_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Request>,
    statuses: HashMap<String, StatusRecord>,
    responses: HashMap<String, Response>,
}

/// In-memory [`AdmissionQueue`] guarded by a single reader/writer lock.
///
/// The pending list, status map and response map live behind one lock so a
/// mutation is applied to all three or to none.
#[derive(Debug)]
pub struct FifoQueue {
    capacity: usize,
    state: RwLock<QueueState>,
}

impl FifoQueue {
    /// Create a queue holding at most `capacity` pending requests.
    /// A capacity of zero selects [`DEFAULT_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            capacity
        };

        Self {
            capacity,
            state: RwLock::new(QueueState {
                pending: VecDeque::with_capacity(capacity),
                ..Default::default()
            }),
        }
    }

    /// Maximum number of pending requests
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The stored response for a finished request, `None` while unfinished
    pub fn response(
        &self,
        ctx: &Context,
        request_id: &str,
    ) -> Result<Option<Response>, QueueError> {
        check(ctx)?;
        require_id(request_id)?;

        let state = self.read();
        if !state.statuses.contains_key(request_id) {
            return Err(QueueError::NotFound(request_id.to_string()));
        }
        Ok(state.responses.get(request_id).cloned())
    }

    /// Number of status records currently retained (pending and finished)
    pub fn tracked(&self) -> usize {
        self.read().statuses.len()
    }

    /// Drop terminal records whose last transition is older than `max_age`.
    ///
    /// Returns how many records were removed. Queued and processing records
    /// are always kept.
    pub fn prune_finished(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut state = self.write();

        let expired: Vec<String> = state
            .statuses
            .iter()
            .filter(|(_, record)| {
                record.state.is_terminal() && now.duration_since(record.updated_at) >= max_age
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            state.statuses.remove(id);
            state.responses.remove(id);
        }

        if !expired.is_empty() {
            debug!(removed = expired.len(), "pruned finished request records");
        }
        expired.len()
    }

    fn finish(
        &self,
        ctx: &Context,
        request_id: &str,
        response: Response,
        terminal: RequestState,
    ) -> Result<(), QueueError> {
        check(ctx)?;
        require_id(request_id)?;

        let mut state = self.write();
        let Some(record) = state.statuses.get_mut(request_id) else {
            return Err(QueueError::InvalidArgument(format!(
                "request {} was never admitted",
                request_id
            )));
        };

        if record.state == RequestState::Queued {
            return Err(QueueError::InvalidArgument(format!(
                "request {} has not been taken yet",
                request_id
            )));
        }

        record.state = terminal;
        record.updated_at = Instant::now();
        state.responses.insert(request_id.to_string(), response);

        debug!(request_id, state = %terminal, "request finished");
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, QueueState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, QueueState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FifoQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl AdmissionQueue for FifoQueue {
    fn admit(&self, ctx: &Context, request: Request) -> Result<(), QueueError> {
        check(ctx)?;
        require_id(&request.id)?;

        let mut state = self.write();

        if state.pending.len() >= self.capacity {
            return Err(QueueError::QueueFull {
                capacity: self.capacity,
            });
        }
        if state.statuses.contains_key(&request.id) {
            return Err(QueueError::DuplicateRequest(request.id));
        }

        state.statuses.insert(
            request.id.clone(),
            StatusRecord {
                state: RequestState::Queued,
                updated_at: Instant::now(),
            },
        );
        trace!(request_id = %request.id, pending = state.pending.len() + 1, "request admitted");
        state.pending.push_back(request);

        Ok(())
    }

    fn take(&self, ctx: &Context) -> Result<Option<Request>, QueueError> {
        check(ctx)?;

        let mut state = self.write();
        let Some(request) = state.pending.pop_front() else {
            return Ok(None);
        };

        if let Some(record) = state.statuses.get_mut(&request.id) {
            record.state = RequestState::Processing;
            record.updated_at = Instant::now();
        }
        trace!(request_id = %request.id, "request taken");

        Ok(Some(request))
    }

    fn complete(
        &self,
        ctx: &Context,
        request_id: &str,
        response: Response,
    ) -> Result<(), QueueError> {
        self.finish(ctx, request_id, response, RequestState::Complete)
    }

    fn fail(&self, ctx: &Context, request_id: &str, response: Response) -> Result<(), QueueError> {
        self.finish(ctx, request_id, response, RequestState::Failed)
    }

    fn status(&self, ctx: &Context, request_id: &str) -> Result<RequestStatus, QueueError> {
        check(ctx)?;
        require_id(request_id)?;

        let state = self.read();
        state
            .statuses
            .get(request_id)
            .map(|record| RequestStatus {
                request_id: request_id.to_string(),
                state: record.state,
                updated_at: record.updated_at,
            })
            .ok_or_else(|| QueueError::NotFound(request_id.to_string()))
    }

    fn size(&self) -> usize {
        self.read().pending.len()
    }
}

fn check(ctx: &Context) -> Result<(), QueueError> {
    match ctx.err() {
        Some(reason) => Err(QueueError::Cancelled(reason)),
        None => Ok(()),
    }
}

fn require_id(request_id: &str) -> Result<(), QueueError> {
    if request_id.is_empty() {
        return Err(QueueError::InvalidArgument(
            "request id must not be empty".to_string(),
        ));
    }
    Ok(())
}
