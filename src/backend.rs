/*!
 * Inference backend seam
 *
 * The dispatcher only needs something that turns a request into a JSON result
 * or a classifiable error. The HTTP client for the real model server lives
 * outside this crate; `SimulatedBackend` stands in for it in the CLI and tests.
 */

use aigate_core_resilience::{Context, Request};
use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Failures an inference backend can report
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend could not be reached or answered with a server error
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// No answer within the per-attempt timeout
    #[error("backend timed out after {0:?}")]
    Timeout(Duration),

    /// Backend refused the request
    #[error("backend rejected request: {0}")]
    Rejected(String),

    /// The caller's context was done while waiting for the backend
    #[error("backend call cancelled")]
    Cancelled,
}

/// A slow, occasionally failing inference service
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Run one inference attempt
    async fn infer(
        &self,
        ctx: &Context,
        request: &Request,
    ) -> Result<serde_json::Value, BackendError>;
}

/// Backend with fixed latency and a random failure rate
#[derive(Debug)]
pub struct SimulatedBackend {
    latency: Duration,
    failure_rate: f64,
    calls: AtomicU64,
}

impl SimulatedBackend {
    /// `failure_rate` is clamped into `[0, 1]`
    pub fn new(latency: Duration, failure_rate: f64) -> Self {
        Self {
            latency,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            calls: AtomicU64::new(0),
        }
    }

    /// Total number of `infer` calls so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl InferenceBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn infer(
        &self,
        ctx: &Context,
        request: &Request,
    ) -> Result<serde_json::Value, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;

        tokio::select! {
            biased;
            _ = ctx.done() => return Err(BackendError::Cancelled),
            _ = tokio::time::sleep(self.latency) => {}
        }

        let failed = self.failure_rate > 0.0 && rand::rng().random_bool(self.failure_rate);
        if failed {
            return Err(BackendError::Unavailable(format!(
                "simulated outage on call {}",
                call
            )));
        }

        Ok(json!({
            "mode": request.mode,
            "summary": format!("analyzed {} bytes", request.content.len()),
            "call": call,
        }))
    }
}
