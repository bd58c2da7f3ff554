//! One-time, process-wide tracer setup.
//!
//! The first successful [`TracerBootstrap::setup`] builds a tracer provider,
//! installs it as the global provider and hands out a tracer. Every later call
//! returns that same tracer without touching exporters or the resource again.
//! A caller-supplied tracer bypasses all of this.
//!
//! Exporter selection honours the standard OTLP environment variables:
//! - `OTEL_EXPORTER_OTLP_ENDPOINT` - used when no endpoint is passed explicitly
//! - `OTEL_EXPORTER_OTLP_PROTOCOL` - `grpc` selects gRPC, anything else HTTP/protobuf
//! - `OTEL_EXPORTER_OTLP_HEADERS` - `key=value` pairs separated by commas, `%20` decoded
//!
//! Without an endpoint, spans are printed to stdout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::{Lazy, OnceCell};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig, WithTonicConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider, SpanExporter, TracerProviderBuilder,
};
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};

use crate::error::{AnchorError, CoreResult};
use crate::telemetry::{TracerHandle, keys};

pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const OTLP_PROTOCOL_ENV: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
pub const OTLP_HEADERS_ENV: &str = "OTEL_EXPORTER_OTLP_HEADERS";

const INSTRUMENTATION_SCOPE: &str = "anchor";

/// How long the unbuffered processor waits before polling its queue again.
const UNBUFFERED_DELAY: Duration = Duration::from_millis(50);

/// Read once per process.
static OTLP_TRANSPORT: Lazy<Transport> =
    Lazy::new(|| Transport::from_env_value(std::env::var(OTLP_PROTOCOL_ENV).ok().as_deref()));

static GLOBAL: TracerBootstrap = TracerBootstrap::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Grpc,
}

impl Transport {
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("grpc") => Transport::Grpc,
            _ => Transport::Http,
        }
    }
}

/// Inputs to [`TracerBootstrap::setup`].
#[derive(Clone)]
pub struct SetupOptions {
    pub application_name: Option<String>,
    pub environment: Option<String>,
    /// Use this tracer as-is and skip provider installation.
    pub tracer: Option<TracerHandle>,
    pub otlp_endpoint: Option<String>,
    pub otlp_headers: HashMap<String, String>,
    pub use_batching: bool,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            application_name: None,
            environment: None,
            tracer: None,
            otlp_endpoint: None,
            otlp_headers: HashMap::new(),
            use_batching: true,
        }
    }
}

/// Where finished spans go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportPlan {
    Otlp {
        endpoint: String,
        headers: HashMap<String, String>,
        transport: Transport,
        batching: bool,
    },
    /// Stdout exporter behind the simple processor.
    Console,
}

impl ExportPlan {
    /// Pure policy: the explicit endpoint wins over the environment one, and
    /// headers only matter once an endpoint is known.
    pub fn select(
        opts: &SetupOptions,
        env_endpoint: Option<String>,
        env_headers: Option<String>,
        transport: Transport,
    ) -> Self {
        let endpoint = opts
            .otlp_endpoint
            .clone()
            .or(env_endpoint)
            .filter(|e| !e.trim().is_empty());
        match endpoint {
            Some(endpoint) => {
                let headers = if opts.otlp_headers.is_empty() {
                    env_headers.as_deref().map(parse_headers).unwrap_or_default()
                } else {
                    opts.otlp_headers.clone()
                };
                ExportPlan::Otlp {
                    endpoint,
                    headers,
                    transport,
                    batching: opts.use_batching,
                }
            }
            None => ExportPlan::Console,
        }
    }

    pub(crate) fn from_env(opts: &SetupOptions) -> Self {
        Self::select(
            opts,
            std::env::var(OTLP_ENDPOINT_ENV).ok(),
            std::env::var(OTLP_HEADERS_ENV).ok(),
            *OTLP_TRANSPORT,
        )
    }
}

/// Parse `k=v,k2=v2`; `%20` decodes to a space, malformed pairs are dropped.
pub fn parse_headers(raw: &str) -> HashMap<String, String> {
    let decoded = raw.replace("%20", " ");
    decoded
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// OTLP/HTTP wants the signal path; a bare collector address gets `/v1/traces`.
pub fn traces_url(endpoint: &str) -> String {
    signal_url(endpoint, "/v1/traces")
}

pub(crate) fn signal_url(endpoint: &str, path: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    if trimmed.ends_with(path) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{path}")
    }
}

pub fn build_resource(opts: &SetupOptions) -> Resource {
    let mut attrs = vec![KeyValue::new(keys::TELEMETRY_SDK_NAME, keys::SDK_NAME)];
    if let Some(app) = &opts.application_name {
        attrs.push(KeyValue::new(keys::SERVICE_NAME, app.clone()));
    }
    if let Some(env) = &opts.environment {
        attrs.push(KeyValue::new(keys::DEPLOYMENT_ENVIRONMENT, env.clone()));
    }
    Resource::builder().with_attributes(attrs).build()
}

/// Default provider factory: builds the exporter named by `plan`.
pub fn build_provider(plan: &ExportPlan, resource: Resource) -> CoreResult<SdkTracerProvider> {
    let builder = SdkTracerProvider::builder().with_resource(resource);
    let builder = match plan {
        ExportPlan::Console => {
            builder.with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        }
        ExportPlan::Otlp {
            endpoint,
            headers,
            transport: Transport::Http,
            batching,
        } => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_endpoint(traces_url(endpoint))
                .with_headers(headers.clone())
                .build()
                .map_err(|e| AnchorError::Setup(format!("otlp/http exporter: {e}")))?;
            attach(builder, exporter, *batching)
        }
        ExportPlan::Otlp {
            endpoint,
            headers,
            transport: Transport::Grpc,
            batching,
        } => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.clone())
                .with_metadata(grpc_metadata(headers))
                .build()
                .map_err(|e| AnchorError::Setup(format!("otlp/grpc exporter: {e}")))?;
            attach(builder, exporter, *batching)
        }
    };
    Ok(builder.build())
}

/// Header pairs as gRPC metadata; pairs that are not valid ASCII metadata are dropped.
pub(crate) fn grpc_metadata(headers: &HashMap<String, String>) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (k, v) in headers {
        if let (Ok(key), Ok(value)) = (
            k.parse::<MetadataKey<Ascii>>(),
            v.parse::<MetadataValue<Ascii>>(),
        ) {
            metadata.insert(key, value);
        }
    }
    metadata
}

/// OTLP exporters do blocking network I/O, so they never run on the thread
/// that ends the span. Without batching, each span is exported on its own
/// from the processor thread.
fn attach<E>(builder: TracerProviderBuilder, exporter: E, batching: bool) -> TracerProviderBuilder
where
    E: SpanExporter + 'static,
{
    if batching {
        return builder.with_batch_exporter(exporter);
    }
    let config = BatchConfigBuilder::default()
        .with_max_export_batch_size(1)
        .with_scheduled_delay(UNBUFFERED_DELAY)
        .build();
    builder.with_span_processor(
        BatchSpanProcessor::builder(exporter)
            .with_batch_config(config)
            .build(),
    )
}

struct Installed {
    provider: SdkTracerProvider,
    tracer: TracerHandle,
}

/// Guards provider installation. Concurrent first calls are serialized so
/// exactly one of them builds the provider; a failed build leaves the cell
/// empty and a later call may retry.
pub struct TracerBootstrap {
    installed: OnceCell<Installed>,
}

impl Default for TracerBootstrap {
    fn default() -> Self {
        Self::new()
    }
}

impl TracerBootstrap {
    pub const fn new() -> Self {
        Self {
            installed: OnceCell::new(),
        }
    }

    pub fn setup(&self, opts: &SetupOptions) -> Option<TracerHandle> {
        self.setup_with(opts, build_provider)
    }

    /// Like [`setup`](Self::setup) with a caller-chosen provider factory.
    pub fn setup_with<F>(&self, opts: &SetupOptions, build: F) -> Option<TracerHandle>
    where
        F: FnOnce(&ExportPlan, Resource) -> CoreResult<SdkTracerProvider>,
    {
        if let Some(tracer) = &opts.tracer {
            return Some(tracer.clone());
        }

        let installed = self.installed.get_or_try_init(|| {
            let plan = ExportPlan::from_env(opts);
            let provider = build(&plan, build_resource(opts))?;
            global::set_tracer_provider(provider.clone());
            let tracer = Arc::new(provider.tracer(INSTRUMENTATION_SCOPE));
            tracing::debug!(
                otlp = matches!(plan, ExportPlan::Otlp { .. }),
                "tracer provider installed"
            );
            Ok::<_, AnchorError>(Installed { provider, tracer })
        });

        match installed {
            Ok(installed) => Some(installed.tracer.clone()),
            Err(err) => {
                tracing::warn!(error = %err, "tracer setup failed; continuing without telemetry");
                None
            }
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed.get().is_some()
    }

    /// Flush and shut down the installed provider, if any.
    pub fn shutdown(&self) -> CoreResult<()> {
        if let Some(installed) = self.installed.get() {
            installed
                .provider
                .shutdown()
                .map_err(|e| AnchorError::Setup(format!("tracer provider shutdown: {e}")))?;
        }
        Ok(())
    }
}

/// Process-wide [`TracerBootstrap::setup`].
pub fn setup_tracing(opts: &SetupOptions) -> Option<TracerHandle> {
    GLOBAL.setup(opts)
}

pub fn shutdown_tracing() -> CoreResult<()> {
    GLOBAL.shutdown()
}
