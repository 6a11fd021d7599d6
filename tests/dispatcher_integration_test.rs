//! Dispatcher driven end to end through the public API

use aigate::resilience::{AdmissionQueue, Context, FifoQueue, Request, RequestState, RetryConfig};
use aigate::{
    run_simulation, BackendError, Dispatcher, DispatcherConfig, GateConfig, GateError,
    InferenceBackend, SimulationOptions,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fails each request id a fixed number of times before answering
struct FlakyBackend {
    failures_per_request: u32,
    seen: Mutex<HashMap<String, u32>>,
    total: AtomicU32,
}

impl FlakyBackend {
    fn new(failures_per_request: u32) -> Self {
        Self {
            failures_per_request,
            seen: Mutex::new(HashMap::new()),
            total: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl InferenceBackend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn infer(
        &self,
        _ctx: &Context,
        request: &Request,
    ) -> Result<serde_json::Value, BackendError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        let calls = {
            let mut seen = self.seen.lock().unwrap();
            let entry = seen.entry(request.id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        if calls <= self.failures_per_request {
            Err(BackendError::Unavailable(format!("{} attempt {}", request.id, calls)))
        } else {
            Ok(json!({ "id": request.id, "calls": calls }))
        }
    }
}

fn retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(50),
        multiplier: 2.0,
        max_delay: Duration::from_secs(1),
        jitter: 0.1,
    }
}

async fn wait_for_terminal(queue: &FifoQueue, ids: &[String]) {
    let ctx = Context::new();
    loop {
        let done = ids
            .iter()
            .all(|id| queue.status(&ctx, id).unwrap().state.is_terminal());
        if done {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_pool_recovers_from_transient_failures() {
    let queue = Arc::new(FifoQueue::new(64));
    let backend = Arc::new(FlakyBackend::new(2));
    let ctx = Context::new();

    let ids: Vec<String> = (0..20).map(|i| format!("req-{}", i)).collect();
    for id in &ids {
        let request = Request::new(id, "full", "fn main() {}");
        queue.admit(&ctx, request).unwrap();
    }

    let handle = Dispatcher::new(
        queue.clone(),
        backend.clone(),
        retry(3),
        DispatcherConfig::default().with_workers(4),
    )
    .spawn();

    wait_for_terminal(&queue, &ids).await;
    let stats = handle.shutdown().await;

    assert_eq!(stats.succeeded, 20);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.attempts, 60);
    assert_eq!(backend.total.load(Ordering::SeqCst), 60);
    for id in &ids {
        assert_eq!(
            queue.status(&ctx, id).unwrap().state,
            RequestState::Complete
        );
        let response = queue.response(&ctx, id).unwrap().unwrap();
        assert_eq!(response.result["calls"], 3);
    }
}

#[tokio::test(start_paused = true)]
async fn test_budget_exhaustion_and_override() {
    let queue = Arc::new(FifoQueue::new(8));
    let backend = Arc::new(FlakyBackend::new(3));
    let ctx = Context::new();

    let default = Request::new("default", "preview", "x");
    let extended = Request::new("extended", "critical", "x").with_max_retry(4);
    queue.admit(&ctx, default).unwrap();
    queue.admit(&ctx, extended).unwrap();

    let handle = Dispatcher::new(
        queue.clone(),
        backend,
        retry(2),
        DispatcherConfig::default().with_workers(2),
    )
    .spawn();

    let ids = ["default".to_string(), "extended".to_string()];
    wait_for_terminal(&queue, &ids).await;
    let stats = handle.shutdown().await;

    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 1);

    assert_eq!(
        queue.status(&ctx, "default").unwrap().state,
        RequestState::Failed
    );
    let failed = queue.response(&ctx, "default").unwrap().unwrap();
    assert_eq!(failed.result["attempts"], 2);
    assert_eq!(
        failed.result["error"],
        "backend unavailable: default attempt 2"
    );

    assert_eq!(
        queue.status(&ctx, "extended").unwrap().state,
        RequestState::Complete
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_mid_backoff_marks_failed_not_stuck() {
    let queue = Arc::new(FifoQueue::new(8));
    let ctx = Context::new();
    let request = Request::new("slow", "full", "x");
    queue.admit(&ctx, request).unwrap();

    let handle = Dispatcher::new(
        queue.clone(),
        Arc::new(FlakyBackend::new(100)),
        RetryConfig {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            ..retry(5)
        },
        DispatcherConfig::default().with_workers(1),
    )
    .spawn();

    // First attempt fails after 20ms, then the worker sits in a 30s backoff
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        queue.status(&ctx, "slow").unwrap().state,
        RequestState::Processing
    );

    let stats = handle.shutdown().await;

    assert_eq!(stats.cancelled, 1);
    assert_eq!(
        queue.status(&ctx, "slow").unwrap().state,
        RequestState::Failed
    );
    let response = queue.response(&ctx, "slow").unwrap().unwrap();
    assert_eq!(response.result["error"], "cancelled");
}

#[tokio::test(start_paused = true)]
async fn test_simulation_with_failing_backend_is_incomplete() {
    let mut config = GateConfig::default();
    config.retry.max_attempts = 2;
    config.retry.initial_delay_ms = 10;
    config.dispatcher.max_attempts_ceiling = 2;

    let options = SimulationOptions {
        requests: 6,
        failure_rate: 1.0,
        latency: Duration::from_millis(1),
        timeout: Duration::from_secs(30),
    };

    let report = run_simulation(&config, &options, &Context::new())
        .await
        .unwrap();

    assert_eq!(report.submitted, 6);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 6);
    assert_eq!(report.backend_calls, 12);

    match report.check() {
        Err(err @ GateError::Incomplete { .. }) => assert_eq!(err.exit_code(), 1),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_simulation_stops_at_timeout() {
    let config = GateConfig::default();
    let options = SimulationOptions {
        requests: 4,
        failure_rate: 0.0,
        latency: Duration::from_secs(120),
        timeout: Duration::from_secs(1),
    };

    let report = run_simulation(&config, &options, &Context::new())
        .await
        .unwrap();

    assert_eq!(report.submitted, 4);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.cancelled, 4);
    assert!(report.check().is_err());
}
