/*!
 * aigate - backpressure-aware dispatch of inference requests
 *
 * Composition layer on top of `aigate-core-resilience`:
 * - Configuration (TOML + `AIGATE_*` environment overrides)
 * - Structured logging via `tracing`
 * - Inference backend seam with a simulated backend
 * - Dispatcher worker pool running backend calls under exponential backoff
 * - Retention sweeper for finished request records
 * - End-to-end simulation used by the CLI
 */

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod simulate;

// Re-export commonly used types
pub use aigate_core_resilience as resilience;
pub use backend::{BackendError, InferenceBackend, SimulatedBackend};
pub use config::GateConfig;
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherHandle, DispatcherStats, Outcome};
pub use error::{GateError, Result};
pub use simulate::{run_simulation, SimulationOptions, SimulationReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
