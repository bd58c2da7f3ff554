//! Application entry point: set up tracing and install vendor instrumentation.

use std::sync::Arc;

use crate::config::InitOptions;
use crate::error::CoreResult;
use crate::instrumentation::{HookTable, InstrumentationConfig, InstrumentedOpenAi};
use crate::provider::OpenAiApi;
use crate::registry::InstrumentorRegistry;
use crate::telemetry::{
    GenAiMetrics, SetupOptions, TracerHandle, install_meter_provider, install_propagators,
    setup_tracing, shutdown_metrics, shutdown_tracing,
};

/// Handle returned by [`init`]. Wrap clients with it; drop it or call
/// [`Anchor::uninstall_all`] to stop tracing them.
pub struct Anchor {
    tracer: TracerHandle,
    config: Arc<InstrumentationConfig>,
    hooks: Arc<HookTable>,
    registry: InstrumentorRegistry,
    installed: Vec<String>,
}

/// Set up tracing and instrument every vendor in `options.instrumentations`.
///
/// Returns `None` only when no tracer could be set up. A vendor that is
/// unknown or fails to install is logged and skipped.
pub fn init(options: &InitOptions) -> Option<Anchor> {
    init_with(options, InstrumentorRegistry::builtin(), None)
}

/// [`init`] with a custom registry and, optionally, a tracer the application
/// already owns. An application passing its own tracer also owns the global
/// meter provider; no meter provider is installed for it.
pub fn init_with(
    options: &InitOptions,
    registry: InstrumentorRegistry,
    tracer: Option<TracerHandle>,
) -> Option<Anchor> {
    let setup = SetupOptions {
        application_name: options.application_name.clone(),
        environment: options.environment.clone(),
        tracer,
        otlp_endpoint: options.otlp_endpoint.clone(),
        otlp_headers: options.otlp_headers.clone(),
        use_batching: !options.disable_batch,
    };
    let external = setup.tracer.is_some();
    let tracer = setup_tracing(&setup)?;
    install_propagators();

    if !options.disable_metrics && !external {
        install_meter_provider(&setup);
    }
    let metrics = (!options.disable_metrics).then(|| Arc::new(GenAiMetrics::global()));
    let config = Arc::new(
        InstrumentationConfig::new(tracer.clone())
            .with_pricing(options.pricing.clone())
            .with_environment(options.environment.clone())
            .with_application_name(options.application_name.clone())
            .with_capture_message_content(options.capture_message_content)
            .with_disable_metrics(options.disable_metrics)
            .with_metrics(metrics),
    );

    let hooks = Arc::new(HookTable::new());
    let mut installed = Vec::new();
    for name in &options.instrumentations {
        let outcome = registry
            .resolve(name)
            .and_then(|instrumentor| instrumentor.install(config.clone(), &hooks));
        match outcome {
            Ok(_) => installed.push(name.clone()),
            Err(err) => {
                tracing::warn!(vendor = %name, error = %err, "instrumentation skipped");
            }
        }
    }

    Some(Anchor {
        tracer,
        config,
        hooks,
        registry,
        installed,
    })
}

impl Anchor {
    /// Wrap an OpenAI client so its calls go through the installed hooks.
    pub fn instrument_openai<C: OpenAiApi>(&self, client: C) -> InstrumentedOpenAi<C> {
        InstrumentedOpenAi::new(client, self.hooks.clone())
    }

    pub fn tracer(&self) -> &TracerHandle {
        &self.tracer
    }

    pub fn config(&self) -> &InstrumentationConfig {
        &self.config
    }

    pub fn hooks(&self) -> &Arc<HookTable> {
        &self.hooks
    }

    /// Vendors that were installed successfully.
    pub fn installed(&self) -> &[String] {
        &self.installed
    }

    /// Remove every installed hook; wrapped clients keep working untraced.
    pub fn uninstall_all(&mut self) -> usize {
        let mut removed = 0;
        for name in self.installed.drain(..) {
            if let Ok(instrumentor) = self.registry.resolve(&name) {
                removed += instrumentor.uninstall(&self.hooks);
            }
        }
        removed
    }

    /// Flush and shut down the process-wide tracer and meter providers.
    pub fn shutdown(self) -> CoreResult<()> {
        let traces = shutdown_tracing();
        shutdown_metrics()?;
        traces
    }
}

impl std::fmt::Debug for Anchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Anchor")
            .field("installed", &self.installed)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}
