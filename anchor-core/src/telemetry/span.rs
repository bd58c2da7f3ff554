use std::borrow::Cow;
use std::error::Error;

use opentelemetry::trace::{SpanContext, SpanKind, Status, TraceContextExt, Tracer as _};
use opentelemetry::{Context, Key, KeyValue, Value};
use opentelemetry_sdk::trace::Tracer;

/// The span of one intercepted client call.
///
/// The span lives inside a [`Context`] so the wrapped call can run with it
/// active: spans started by the vendor client and propagated `traceparent`
/// headers become its children. Closed by [`CallSpan::end`], which consumes
/// it, so a span is closed exactly once. Status is `Ok` on close unless a
/// failure was recorded first.
pub struct CallSpan {
    cx: Context,
    failed: bool,
}

impl CallSpan {
    /// Start a client-kind span parented on the current context.
    pub fn start(tracer: &Tracer, name: impl Into<Cow<'static, str>>) -> Self {
        let span = tracer
            .span_builder(name)
            .with_kind(SpanKind::Client)
            .start(tracer);
        Self {
            cx: Context::current_with_span(span),
            failed: false,
        }
    }

    /// Context with this span active; attach it to the wrapped call.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn span_context(&self) -> SpanContext {
        self.cx.span().span_context().clone()
    }

    /// False when the span was sampled out; attribute work can be skipped.
    pub fn is_recording(&self) -> bool {
        self.cx.span().is_recording()
    }

    pub fn set(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        let span = self.cx.span();
        if span.is_recording() {
            span.set_attribute(KeyValue::new(key, value));
        }
    }

    /// Attach an exception event and mark the span as failed.
    pub fn record_failure(&mut self, err: &dyn Error) {
        let span = self.cx.span();
        span.record_error(err);
        span.set_status(Status::error(err.to_string()));
        self.failed = true;
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn end(self) {
        let span = self.cx.span();
        if !self.failed {
            span.set_status(Status::Ok);
        }
        span.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::test_span::{attr, install_capture, install_unsampled};

    #[test]
    fn closes_with_ok_status_and_client_kind() {
        let capture = install_capture();
        let mut span = CallSpan::start(&capture.tracer, "chat gpt-4o");
        assert!(span.is_recording());
        span.set("gen_ai.request.model", "gpt-4o");
        span.end();

        let spans = capture.finished();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "chat gpt-4o");
        assert_eq!(spans[0].span_kind, SpanKind::Client);
        assert_eq!(spans[0].status, Status::Ok);
        assert_eq!(
            attr(&spans[0], "gen_ai.request.model").unwrap().as_str(),
            "gpt-4o"
        );
    }

    #[test]
    fn recorded_failure_wins_over_ok() {
        let capture = install_capture();
        let mut span = CallSpan::start(&capture.tracer, "chat gpt-4o");
        let err = std::io::Error::other("boom");
        span.record_failure(&err);
        assert!(span.has_failed());
        span.end();

        let spans = capture.finished();
        assert!(matches!(spans[0].status, Status::Error { .. }));
        assert!(spans[0].events.iter().any(|e| e.name == "exception"));
    }

    #[test]
    fn unsampled_span_is_not_recording_and_never_exported() {
        let capture = install_unsampled();
        let mut span = CallSpan::start(&capture.tracer, "chat gpt-4o");
        assert!(!span.is_recording());
        span.set("gen_ai.request.model", "gpt-4o");
        span.end();
        assert!(capture.finished().is_empty());
    }

    #[test]
    fn context_carries_the_exported_span() {
        let capture = install_capture();
        let span = CallSpan::start(&capture.tracer, "embedding text-embedding-3-small");
        let active = {
            let _guard = span.context().clone().attach();
            Context::current().span().span_context().clone()
        };
        assert!(active.is_valid());
        assert_eq!(active, span.span_context());
        span.end();

        let spans = capture.finished();
        assert_eq!(spans[0].span_context.span_id(), active.span_id());
    }
}
