use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AnchorError, CoreResult};
use crate::instrumentation::{Instrumentor, OpenAiInstrumentor};

/// Instrumentors by vendor name. Names match the `instrumentations` list in
/// [`InitOptions`](crate::config::InitOptions).
#[derive(Clone, Default)]
pub struct InstrumentorRegistry {
    instrumentors: HashMap<String, Arc<dyn Instrumentor>>,
}

impl InstrumentorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every vendor integration compiled into this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(OpenAiInstrumentor));
        registry
    }

    /// Add or replace the instrumentor under its own name.
    pub fn register(&mut self, instrumentor: Arc<dyn Instrumentor>) -> Option<Arc<dyn Instrumentor>> {
        self.instrumentors
            .insert(instrumentor.name().to_string(), instrumentor)
    }

    pub fn resolve(&self, name: &str) -> CoreResult<Arc<dyn Instrumentor>> {
        self.instrumentors
            .get(name)
            .cloned()
            .ok_or_else(|| AnchorError::NotFound(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.instrumentors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for InstrumentorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentorRegistry")
            .field("names", &self.names())
            .finish()
    }
}
