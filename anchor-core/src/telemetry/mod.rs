//! OpenTelemetry plumbing: attribute keys, the one-time tracer bootstrap,
//! propagators, per-call spans and metrics.

pub mod bootstrap;
pub mod keys;
pub mod metrics;
pub mod propagators;
pub mod span;
#[cfg(test)]
pub mod test_span;

pub use bootstrap::{SetupOptions, TracerBootstrap, setup_tracing, shutdown_tracing};
pub use metrics::{GenAiMetrics, install_meter_provider, shutdown_metrics};
pub use propagators::install_propagators;
pub use span::CallSpan;

use std::sync::Arc;

/// Shared tracer handle. Clones point at the same tracer, so identity can be
/// compared with `Arc::ptr_eq`.
pub type TracerHandle = Arc<opentelemetry_sdk::trace::Tracer>;
