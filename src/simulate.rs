/*!
 * End-to-end simulation: producers, queue, dispatcher and a simulated backend
 */

use aigate_core_resilience::{Context, FifoQueue, Request};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::backend::SimulatedBackend;
use crate::config::GateConfig;
use crate::dispatcher::{
    admit_with_backpressure, spawn_retention_sweeper, Dispatcher, DispatcherStats,
};
use crate::error::{GateError, Result};

const MODES: [&str; 3] = ["preview", "full", "critical"];

/// Parameters of one simulation run
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub requests: usize,
    pub failure_rate: f64,
    pub latency: Duration,
    /// Overall limit on submission plus processing
    pub timeout: Duration,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            requests: 100,
            failure_rate: 0.2,
            latency: Duration::from_millis(50),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Summary printed by `aigate simulate`
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub requested: usize,
    pub submitted: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Requests that never reached a terminal state before the run ended
    pub unfinished: usize,
    pub backend_calls: u64,
    pub elapsed_ms: u128,
    pub stats: DispatcherStats,
}

impl SimulationReport {
    /// Ok when every requested item completed successfully
    pub fn check(&self) -> Result<()> {
        let failed = (self.failed + self.cancelled) as usize;
        if failed > 0 || self.unfinished > 0 {
            return Err(GateError::Incomplete {
                failed,
                unfinished: self.unfinished,
            });
        }
        Ok(())
    }
}

fn build_request(i: usize) -> Request {
    let mode = MODES[i % MODES.len()];
    let request = Request::new(
        format!("sim-{:05}", i),
        mode,
        format!("synthetic payload #{}", i),
    )
    .with_user((i % 7) as i64 + 1);

    // Critical reviews get a larger budget than the configured default
    if mode == "critical" {
        request.with_max_retry(5)
    } else {
        request
    }
}

/// Run a full simulation.
///
/// Cancelling `ctx` (e.g. on Ctrl-C) stops submission and waiting early; the
/// dispatcher is shut down either way and its final counts reported.
pub async fn run_simulation(
    config: &GateConfig,
    options: &SimulationOptions,
    ctx: &Context,
) -> Result<SimulationReport> {
    config.validate()?;

    let started = Instant::now();
    let queue = Arc::new(FifoQueue::new(config.queue.capacity));
    let backend = Arc::new(SimulatedBackend::new(options.latency, options.failure_rate));
    let dispatcher_config = config.dispatcher_config().with_name("simulate");
    let poll_interval = dispatcher_config.poll_interval;

    info!(
        requests = options.requests,
        capacity = queue.capacity(),
        workers = dispatcher_config.workers,
        failure_rate = options.failure_rate,
        "starting simulation"
    );

    let handle = Dispatcher::new(
        queue.clone(),
        backend.clone(),
        config.retry_config(),
        dispatcher_config,
    )
    .spawn();

    let sweeper = config.retention().map(|retention| {
        spawn_retention_sweeper(
            queue.clone(),
            retention,
            retention.min(Duration::from_secs(60)),
            handle.context().child(),
        )
    });

    let deadline = ctx.with_timeout(options.timeout);

    let mut submitted = 0;
    for i in 0..options.requests {
        match admit_with_backpressure(queue.as_ref(), &deadline, build_request(i), poll_interval)
            .await
        {
            Ok(()) => submitted += 1,
            Err(e) if e.is_cancelled() => {
                warn!(submitted, "submission stopped: {}", e);
                break;
            }
            Err(e) => {
                handle.shutdown().await;
                return Err(e.into());
            }
        }
    }

    while (handle.stats().processed as usize) < submitted {
        tokio::select! {
            biased;
            reason = deadline.done() => {
                warn!(%reason, "simulation ended before all requests finished");
                break;
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    let stats = handle.shutdown().await;
    if let Some(sweeper) = sweeper {
        if let Ok(pruned) = sweeper.await {
            info!(pruned, "retention sweeper stopped");
        }
    }

    let report = SimulationReport {
        requested: options.requests,
        submitted,
        succeeded: stats.succeeded,
        failed: stats.failed,
        cancelled: stats.cancelled,
        unfinished: options.requests.saturating_sub(stats.processed as usize),
        backend_calls: backend.calls(),
        elapsed_ms: started.elapsed().as_millis(),
        stats,
    };

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        cancelled = report.cancelled,
        unfinished = report.unfinished,
        "simulation finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_modes() {
        let first = build_request(0);
        assert_eq!(first.id, "sim-00000");
        assert_eq!(first.mode, "preview");
        assert_eq!(first.max_retry, 0);

        let critical = build_request(2);
        assert_eq!(critical.mode, "critical");
        assert_eq!(critical.max_retry, 5);
    }

    #[test]
    fn test_report_check() {
        let report = SimulationReport {
            requested: 3,
            submitted: 3,
            succeeded: 2,
            failed: 0,
            cancelled: 1,
            unfinished: 0,
            backend_calls: 4,
            elapsed_ms: 10,
            stats: DispatcherStats::default(),
        };
        match report.check() {
            Err(GateError::Incomplete { failed, unfinished }) => {
                assert_eq!(failed, 1);
                assert_eq!(unfinished, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_healthy_simulation() {
        let mut config = GateConfig::default();
        config.queue.capacity = 4;
        config.dispatcher.workers = 2;

        let options = SimulationOptions {
            requests: 12,
            failure_rate: 0.0,
            latency: Duration::from_millis(5),
            timeout: Duration::from_secs(30),
        };

        let report = run_simulation(&config, &options, &Context::new())
            .await
            .unwrap();

        assert_eq!(report.submitted, 12);
        assert_eq!(report.succeeded, 12);
        assert_eq!(report.backend_calls, 12);
        assert!(report.check().is_ok());
    }
}
