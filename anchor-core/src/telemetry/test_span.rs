#![cfg(test)]

use std::sync::{Arc, Mutex};

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::{InMemorySpanExporter, Sampler, SdkTracerProvider, SpanData};
use tracing::{Level, Subscriber};
use tracing_core::field::{Field, Visit};
use tracing_subscriber::{layer::Context, Layer};

use crate::telemetry::TracerHandle;

/// A tracer wired to an in-memory exporter through the simple processor,
/// so spans are visible as soon as they end.
pub struct SpanCapture {
    pub exporter: InMemorySpanExporter,
    pub provider: SdkTracerProvider,
    pub tracer: TracerHandle,
}

impl SpanCapture {
    pub fn finished(&self) -> Vec<SpanData> {
        let _ = self.provider.force_flush();
        self.exporter.get_finished_spans().unwrap()
    }
}

pub fn install_capture() -> SpanCapture {
    capture_with(Sampler::AlwaysOn)
}

/// Every span is sampled out and never reaches the exporter.
pub fn install_unsampled() -> SpanCapture {
    capture_with(Sampler::AlwaysOff)
}

fn capture_with(sampler: Sampler) -> SpanCapture {
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_sampler(sampler)
        .with_simple_exporter(exporter.clone())
        .build();
    let tracer = Arc::new(provider.tracer("anchor-test"));
    SpanCapture {
        exporter,
        provider,
        tracer,
    }
}

pub fn attr<'a>(span: &'a SpanData, key: &str) -> Option<&'a opentelemetry::Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| &kv.value)
}

pub fn attr_keys(span: &SpanData) -> Vec<String> {
    span.attributes
        .iter()
        .map(|kv| kv.key.as_str().to_string())
        .collect()
}

/// Log events captured from `tracing` macros: (level, message).
#[derive(Default, Debug)]
pub struct EventStore {
    pub events: Mutex<Vec<(Level, String)>>,
}

impl EventStore {
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

#[derive(Clone)]
pub struct EventCapture {
    pub store: Arc<EventStore>,
}

impl<S: Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        #[derive(Default)]
        struct MessageVisitor {
            message: String,
            fields: String,
        }
        impl Visit for MessageVisitor {
            fn record_debug(&mut self, field: &Field, value: &dyn core::fmt::Debug) {
                if field.name() == "message" {
                    self.message = format!("{value:?}");
                } else {
                    self.fields.push_str(&format!(" {}={value:?}", field.name()));
                }
            }
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.store
            .events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.message + &visitor.fields));
    }
}

/// Capture log events on the current thread until the guard drops.
pub fn capture_events() -> (Arc<EventStore>, tracing::subscriber::DefaultGuard) {
    use tracing_subscriber::prelude::*;
    let store = Arc::new(EventStore::default());
    let layer = EventCapture {
        store: store.clone(),
    };
    let subscriber = tracing_subscriber::registry::Registry::default().with(layer);
    let guard = tracing::subscriber::set_default(subscriber);
    (store, guard)
}
