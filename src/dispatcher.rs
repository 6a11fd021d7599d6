/*!
 * Dispatcher: consumer workers composing the admission queue with the retry executor
 *
 * Each worker polls the queue, runs the backend call under exponential
 * backoff, and records the outcome back on the queue. The queue and the
 * executor stay unaware of each other; this module is the glue.
 *
 * ```text
 *   take ──► ExponentialBackoff::execute_with_retry(backend.infer) ──► complete | fail
 *    ▲                                                                      │
 *    └───────────── idle: wait poll_interval or shutdown ◄──────────────────┘
 * ```
 */

use aigate_core_resilience::{
    AdmissionQueue, Context, ExponentialBackoff, FifoQueue, QueueError, Request, Response,
    RetryConfig, RetryError, RetryStrategy,
};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, InferenceBackend};

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name for logging
    pub name: String,
    /// Number of concurrent workers
    pub workers: usize,
    /// How long an idle worker waits before polling again
    pub poll_interval: Duration,
    /// Optional limit on each individual backend call
    pub attempt_timeout: Option<Duration>,
    /// Upper bound on a request's own `max_retry`
    pub max_attempts_ceiling: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "aigate-dispatcher".to_string(),
            workers: 4,
            poll_interval: Duration::from_millis(50),
            attempt_timeout: None,
            max_attempts_ceiling: 10,
        }
    }
}

impl DispatcherConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn with_max_attempts_ceiling(mut self, ceiling: u32) -> Self {
        self.max_attempts_ceiling = ceiling;
        self
    }
}

/// What happened to one dispatched request
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        request_id: String,
        attempts: u32,
        duration: Duration,
    },
    Failed {
        request_id: String,
        attempts: u32,
        error: String,
    },
    Cancelled {
        request_id: String,
        attempts: u32,
    },
}

impl Outcome {
    pub fn request_id(&self) -> &str {
        match self {
            Outcome::Completed { request_id, .. }
            | Outcome::Failed { request_id, .. }
            | Outcome::Cancelled { request_id, .. } => request_id,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Completed { attempts, .. }
            | Outcome::Failed { attempts, .. }
            | Outcome::Cancelled { attempts, .. } => *attempts,
        }
    }
}

#[derive(Debug, Default)]
struct DispatcherMetrics {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    attempts: AtomicU64,
    in_flight: AtomicUsize,
}

impl DispatcherMetrics {
    fn record(&self, outcome: &Outcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.attempts
            .fetch_add(u64::from(outcome.attempts()), Ordering::Relaxed);
        let counter = match outcome {
            Outcome::Completed { .. } => &self.succeeded,
            Outcome::Failed { .. } => &self.failed,
            Outcome::Cancelled { .. } => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Dispatcher runtime statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Backend invocations, retries included
    pub attempts: u64,
    pub in_flight: usize,
}

/// Consumer side of the admission queue
pub struct Dispatcher<B: InferenceBackend> {
    queue: Arc<dyn AdmissionQueue>,
    backend: Arc<B>,
    retry: RetryConfig,
    config: DispatcherConfig,
    metrics: Arc<DispatcherMetrics>,
}

impl<B: InferenceBackend + 'static> Dispatcher<B> {
    /// Build a dispatcher over `queue` and `backend`.
    ///
    /// `retry` is normalized, not rejected: zero fields take the defaults and
    /// every backoff delay is capped at `max_delay`, even when
    /// `initial_delay` is larger. A configuration that fails
    /// [`RetryConfig::validate`] is logged and used as normalized.
    pub fn new(
        queue: Arc<dyn AdmissionQueue>,
        backend: Arc<B>,
        retry: RetryConfig,
        config: DispatcherConfig,
    ) -> Self {
        if let Err(reason) = retry.validate() {
            warn!(dispatcher = %config.name, %reason, "retry configuration normalized");
        }
        Self {
            queue,
            backend,
            retry: retry.normalized(),
            config,
            metrics: Arc::new(DispatcherMetrics::default()),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn stats(&self) -> DispatcherStats {
        self.metrics.snapshot()
    }

    /// Attempt budget for a request: its own `max_retry` when set, clamped
    /// to the ceiling, otherwise the configured default.
    pub fn attempt_budget(&self, request: &Request) -> u32 {
        if request.max_retry > 0 {
            let ceiling = self.config.max_attempts_ceiling.max(1);
            request.max_retry.min(ceiling)
        } else {
            self.retry.max_attempts
        }
    }

    /// Take one request, if any, and drive it to a recorded outcome.
    ///
    /// Returns `Ok(None)` when the queue is empty.
    pub async fn process_one(&self, ctx: &Context) -> Result<Option<Outcome>, QueueError> {
        let Some(request) = self.queue.take(ctx)? else {
            return Ok(None);
        };

        self.metrics.in_flight.fetch_add(1, Ordering::Relaxed);
        let outcome = self.process(ctx, &request).await;
        self.metrics.in_flight.fetch_sub(1, Ordering::Relaxed);

        self.metrics.record(&outcome);
        Ok(Some(outcome))
    }

    async fn process(&self, ctx: &Context, request: &Request) -> Outcome {
        let budget = self.attempt_budget(request);
        let executor = ExponentialBackoff::new(self.retry.clone().with_max_attempts(budget));
        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;

        debug!(
            request_id = %request.id,
            mode = %request.mode,
            budget = executor.config().max_attempts,
            "dispatching request"
        );

        let result = executor
            .execute_with_retry(ctx, move |attempt_ctx| {
                attempts_ref.fetch_add(1, Ordering::Relaxed);
                self.attempt(attempt_ctx, request)
            })
            .await;

        // A final attempt that failed because the context ended is a cancellation
        let result = match (result, ctx.err()) {
            (Err(RetryError::Exhausted { attempts, .. }), Some(reason)) => {
                Err(RetryError::Cancelled {
                    attempts,
                    reason,
                    during_backoff: false,
                })
            }
            (result, _) => result,
        };

        let attempts = attempts.load(Ordering::Relaxed);
        let duration = started.elapsed();
        let id = request.id.clone();

        // Outcomes are recorded even while the worker is shutting down
        let record_ctx = Context::new();

        match result {
            Ok(value) => {
                let response = Response::new(&id, value, duration);
                if let Err(e) = self.queue.complete(&record_ctx, &id, response) {
                    error!(request_id = %id, error = %e, "failed to record completion");
                }
                info!(request_id = %id, attempts, ?duration, "request complete");
                Outcome::Completed {
                    request_id: id,
                    attempts,
                    duration,
                }
            }
            Err(RetryError::Exhausted { last_error, .. }) => {
                let message = last_error.to_string();
                let response = Response::new(
                    &id,
                    json!({ "error": message, "attempts": attempts }),
                    duration,
                );
                if let Err(e) = self.queue.fail(&record_ctx, &id, response) {
                    error!(request_id = %id, error = %e, "failed to record failure");
                }
                warn!(request_id = %id, attempts, error = %message, "request failed");
                Outcome::Failed {
                    request_id: id,
                    attempts,
                    error: message,
                }
            }
            Err(RetryError::Cancelled { reason, .. }) => {
                let response = Response::new(
                    &id,
                    json!({
                        "error": "cancelled",
                        "reason": reason.to_string(),
                        "attempts": attempts,
                    }),
                    duration,
                );
                if let Err(e) = self.queue.fail(&record_ctx, &id, response) {
                    error!(request_id = %id, error = %e, "failed to record cancellation");
                }
                info!(request_id = %id, attempts, %reason, "request cancelled");
                Outcome::Cancelled {
                    request_id: id,
                    attempts,
                }
            }
        }
    }

    async fn attempt(
        &self,
        ctx: Context,
        request: &Request,
    ) -> Result<serde_json::Value, BackendError> {
        let call = self.backend.infer(&ctx, request);
        match self.config.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(BackendError::Timeout(limit))),
            None => call.await,
        }
    }

    async fn run_worker(self: Arc<Self>, worker: usize, shutdown: Context) {
        debug!(
            dispatcher = %self.config.name,
            worker,
            backend = self.backend.name(),
            "worker started"
        );

        loop {
            match self.process_one(&shutdown).await {
                Ok(Some(outcome)) => {
                    debug!(
                        worker,
                        request_id = outcome.request_id(),
                        "worker finished request"
                    );
                    continue;
                }
                Ok(None) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => error!(worker, error = %e, "queue poll failed"),
            }

            tokio::select! {
                biased;
                _ = shutdown.done() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        debug!(dispatcher = %self.config.name, worker, "worker stopped");
    }

    /// Spawn the worker pool on the current tokio runtime
    pub fn spawn(self) -> DispatcherHandle {
        let shutdown = Context::new();
        let workers = self.config.workers.max(1);

        info!(
            dispatcher = %self.config.name,
            workers,
            max_attempts = self.retry.max_attempts,
            "dispatcher starting"
        );

        let metrics = self.metrics.clone();
        let this = Arc::new(self);
        let workers = (0..workers)
            .map(|i| tokio::spawn(Arc::clone(&this).run_worker(i, shutdown.child())))
            .collect();

        DispatcherHandle {
            shutdown,
            workers,
            metrics,
        }
    }
}

/// Handle to control a running dispatcher
#[derive(Debug)]
pub struct DispatcherHandle {
    shutdown: Context,
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<DispatcherMetrics>,
}

impl DispatcherHandle {
    /// Current statistics
    pub fn stats(&self) -> DispatcherStats {
        self.metrics.snapshot()
    }

    /// Context whose cancellation stops every worker
    pub fn context(&self) -> &Context {
        &self.shutdown
    }

    /// Cancel all workers and wait for them to exit.
    ///
    /// Requests mid-retry are recorded as failed with a cancellation reason.
    pub async fn shutdown(self) -> DispatcherStats {
        self.shutdown.cancel();
        for result in join_all(self.workers).await {
            if let Err(e) = result {
                error!(error = %e, "dispatcher worker panicked");
            }
        }
        let stats = self.metrics.snapshot();
        info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "dispatcher stopped"
        );
        stats
    }
}

/// Admit a request, waiting `retry_every` between attempts while the queue is full.
///
/// Any error other than `QueueFull` is returned at once, as is cancellation
/// of `ctx` while waiting.
pub async fn admit_with_backpressure(
    queue: &dyn AdmissionQueue,
    ctx: &Context,
    request: Request,
    retry_every: Duration,
) -> Result<(), QueueError> {
    loop {
        match queue.admit(ctx, request.clone()) {
            Err(e) if e.is_retryable_admission() => {
                debug!(request_id = %request.id, "queue full, waiting for capacity");
                tokio::select! {
                    biased;
                    reason = ctx.done() => return Err(QueueError::Cancelled(reason)),
                    _ = tokio::time::sleep(retry_every) => {}
                }
            }
            other => return other,
        }
    }
}

/// Periodically drop finished records older than `retention`.
///
/// Resolves to the total number of records pruned once `shutdown` is done.
pub fn spawn_retention_sweeper(
    queue: Arc<FifoQueue>,
    retention: Duration,
    interval: Duration,
    shutdown: Context,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut pruned = 0;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.done() => break,
                _ = tokio::time::sleep(interval) => {
                    pruned += queue.prune_finished(retention);
                }
            }
        }
        pruned
    })
}
