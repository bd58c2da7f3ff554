//! GenAI client metrics: operation duration and token usage.
//!
//! Instruments are created once from a meter and shared by every interceptor.
//! Recording against the global no-op meter is harmless, so these can be
//! created before (or without) a meter provider.
//!
//! [`install_meter_provider`] sets up the process-wide meter provider once,
//! exporting to the same destination the tracer bootstrap picks.

use std::time::Duration;

use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig, WithTonicConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

use crate::error::{AnchorError, CoreResult};
use crate::telemetry::bootstrap::{
    ExportPlan, SetupOptions, Transport, build_resource, grpc_metadata, signal_url,
};

pub const OPERATION_DURATION: &str = "gen_ai.client.operation.duration";
pub const TOKEN_USAGE: &str = "gen_ai.client.token.usage";
pub const TOKEN_TYPE: &str = "gen_ai.token.type";
pub const ERROR_TYPE: &str = "error.type";

static METER_PROVIDER: OnceCell<SdkMeterProvider> = OnceCell::new();

/// OTLP/HTTP metrics path, appended to a bare collector address.
pub fn metrics_url(endpoint: &str) -> String {
    signal_url(endpoint, "/v1/metrics")
}

/// Meter provider with a periodic reader on the exporter named by `plan`.
pub fn build_meter_provider(plan: &ExportPlan, resource: Resource) -> CoreResult<SdkMeterProvider> {
    let builder = SdkMeterProvider::builder().with_resource(resource);
    let builder = match plan {
        ExportPlan::Console => builder.with_reader(
            PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default()).build(),
        ),
        ExportPlan::Otlp {
            endpoint,
            headers,
            transport: Transport::Http,
            ..
        } => {
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_http()
                .with_endpoint(metrics_url(endpoint))
                .with_headers(headers.clone())
                .build()
                .map_err(|e| AnchorError::Setup(format!("otlp/http metric exporter: {e}")))?;
            builder.with_reader(PeriodicReader::builder(exporter).build())
        }
        ExportPlan::Otlp {
            endpoint,
            headers,
            transport: Transport::Grpc,
            ..
        } => {
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.clone())
                .with_metadata(grpc_metadata(headers))
                .build()
                .map_err(|e| AnchorError::Setup(format!("otlp/grpc metric exporter: {e}")))?;
            builder.with_reader(PeriodicReader::builder(exporter).build())
        }
    };
    Ok(builder.build())
}

/// Install the process-wide meter provider unless one is already installed.
/// Returns whether a provider is in place afterwards; failures are logged.
pub fn install_meter_provider(opts: &SetupOptions) -> bool {
    install_with(&METER_PROVIDER, opts, build_meter_provider)
}

fn install_with<F>(cell: &OnceCell<SdkMeterProvider>, opts: &SetupOptions, build: F) -> bool
where
    F: FnOnce(&ExportPlan, Resource) -> CoreResult<SdkMeterProvider>,
{
    let installed = cell.get_or_try_init(|| {
        let provider = build(&ExportPlan::from_env(opts), build_resource(opts))?;
        global::set_meter_provider(provider.clone());
        tracing::debug!("meter provider installed");
        Ok::<_, AnchorError>(provider)
    });
    match installed {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(error = %err, "meter setup failed; metrics stay no-op");
            false
        }
    }
}

/// Flush and shut down the installed meter provider, if any.
pub fn shutdown_metrics() -> CoreResult<()> {
    if let Some(provider) = METER_PROVIDER.get() {
        provider
            .shutdown()
            .map_err(|e| AnchorError::Setup(format!("meter provider shutdown: {e}")))?;
    }
    Ok(())
}

pub struct GenAiMetrics {
    duration: Histogram<f64>,
    tokens: Counter<u64>,
}

impl GenAiMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            duration: meter
                .f64_histogram(OPERATION_DURATION)
                .with_description("Duration of generative-AI client operations")
                .with_unit("s")
                .build(),
            tokens: meter
                .u64_counter(TOKEN_USAGE)
                .with_description("Tokens consumed by generative-AI client operations")
                .with_unit("{token}")
                .build(),
        }
    }

    /// Instruments on the global meter provider.
    pub fn global() -> Self {
        Self::new(&global::meter("anchor"))
    }

    pub fn record_duration(&self, labels: &[KeyValue], elapsed: Duration, failed: bool) {
        if failed {
            let mut labels = labels.to_vec();
            labels.push(KeyValue::new(ERROR_TYPE, "error"));
            self.duration.record(elapsed.as_secs_f64(), &labels);
        } else {
            self.duration.record(elapsed.as_secs_f64(), labels);
        }
    }

    pub fn record_tokens(&self, labels: &[KeyValue], input: Option<i64>, output: Option<i64>) {
        for (kind, count) in [("input", input), ("output", output)] {
            let Some(count) = count.and_then(|c| u64::try_from(c).ok()) else {
                continue;
            };
            let mut labels = labels.to_vec();
            labels.push(KeyValue::new(TOKEN_TYPE, kind));
            self.tokens.add(count, &labels);
        }
    }
}
