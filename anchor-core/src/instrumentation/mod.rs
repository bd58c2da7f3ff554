//! Call interception for generative-AI clients.
//!
//! An [`Instrumentor`] knows one vendor: the [`OperationDescriptor`]s of the
//! methods worth tracing, and how to tell whether its client library is
//! present. Installing it fills a [`HookTable`] with one [`Interceptor`] per
//! available method. Decorated clients consult that table on every call.

pub mod extractors;
pub mod hooks;
pub mod interceptor;
pub mod openai;

pub use extractors::{ExtractContext, Extractor};
pub use hooks::HookTable;
pub use interceptor::{Interceptor, ServerTarget};
pub use openai::{InstrumentedOpenAi, OpenAiInstrumentor};

use std::sync::Arc;

use crate::config::PricingTable;
use crate::error::CoreResult;
use crate::telemetry::{GenAiMetrics, TracerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Chat,
    Embedding,
    Image,
    Audio,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Embedding => "embedding",
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and network defaults of a vendor.
#[derive(Debug)]
pub struct Vendor {
    /// Value of `gen_ai.system`; also the registry and hook-table key.
    pub system: &'static str,
    pub default_host: &'static str,
    pub default_port: u16,
}

/// One interceptable vendor method.
pub struct OperationDescriptor {
    pub vendor: &'static Vendor,
    pub method: &'static str,
    pub operation: OperationType,
    pub default_model: &'static str,
    pub extractor: Extractor,
}

impl std::fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("vendor", &self.vendor.system)
            .field("method", &self.method)
            .field("operation", &self.operation)
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

/// Settings shared read-only by every interceptor of one `init`.
pub struct InstrumentationConfig {
    pub tracer: TracerHandle,
    pub pricing: PricingTable,
    pub environment: Option<String>,
    pub application_name: Option<String>,
    pub metrics: Option<Arc<GenAiMetrics>>,
    /// Record prompt and completion text as span attributes.
    pub capture_message_content: bool,
    pub disable_metrics: bool,
    pub version: String,
}

impl InstrumentationConfig {
    pub fn new(tracer: TracerHandle) -> Self {
        Self {
            tracer,
            pricing: PricingTable::default(),
            environment: None,
            application_name: None,
            metrics: None,
            capture_message_content: true,
            disable_metrics: false,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_environment(mut self, environment: Option<String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_application_name(mut self, application_name: Option<String>) -> Self {
        self.application_name = application_name;
        self
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<GenAiMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_capture_message_content(mut self, capture: bool) -> Self {
        self.capture_message_content = capture;
        self
    }

    pub fn with_disable_metrics(mut self, disable: bool) -> Self {
        self.disable_metrics = disable;
        self
    }

    /// Metrics handle, unless metrics are switched off.
    pub fn active_metrics(&self) -> Option<&GenAiMetrics> {
        if self.disable_metrics {
            None
        } else {
            self.metrics.as_deref()
        }
    }
}

/// A vendor integration that can be installed into a [`HookTable`].
pub trait Instrumentor: Send + Sync {
    /// Registry key, e.g. `openai`.
    fn name(&self) -> &'static str;

    fn descriptors(&self) -> &'static [OperationDescriptor];

    /// Methods the linked client library exposes, or `DependencyMissing`
    /// when the library is not part of this build.
    fn client_surface(&self) -> CoreResult<&'static [&'static str]>;

    /// Hook every described method the client surface has; methods it lacks
    /// are skipped. Re-installing replaces existing hooks. Returns the
    /// number of hooked methods.
    fn install(&self, config: Arc<InstrumentationConfig>, hooks: &HookTable) -> CoreResult<usize> {
        let surface = self.client_surface()?;
        let mut installed = 0;
        for descriptor in self.descriptors() {
            if !surface.contains(&descriptor.method) {
                tracing::debug!(
                    vendor = self.name(),
                    method = descriptor.method,
                    "method not on client surface; skipped"
                );
                continue;
            }
            hooks.replace(descriptor, Arc::new(Interceptor::new(descriptor, config.clone())));
            installed += 1;
        }
        tracing::info!(vendor = self.name(), methods = installed, "instrumentation installed");
        Ok(installed)
    }

    /// Remove this vendor's hooks; decorated clients pass calls straight through afterwards.
    fn uninstall(&self, hooks: &HookTable) -> usize {
        hooks.remove_vendor(self.name())
    }
}
