use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use opentelemetry::trace::FutureExt as _;
use url::Url;

use crate::error::ExtractionError;
use crate::instrumentation::extractors::{ExtractContext, TokenUsage};
use crate::instrumentation::{InstrumentationConfig, OperationDescriptor, Vendor};
use crate::normalizer::{CallArgs, Normalize};
use crate::telemetry::{CallSpan, keys};

/// Host and port a call goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    pub address: String,
    pub port: u16,
}

impl ServerTarget {
    /// Read host and port from the client's base URL. The vendor's default
    /// port is kept unless the URL names one explicitly, so a scheme alone
    /// never changes it; anything unparsable falls back to the defaults.
    pub fn resolve(base_url: Option<&str>, vendor: &Vendor) -> Self {
        let parsed = base_url.and_then(|u| Url::parse(u).ok());
        let address = parsed
            .as_ref()
            .and_then(|u| u.host_str())
            .filter(|h| !h.is_empty())
            .unwrap_or(vendor.default_host)
            .to_string();
        let port = parsed
            .as_ref()
            .and_then(Url::port)
            .unwrap_or(vendor.default_port);
        Self { address, port }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Wraps calls to one vendor method in a client span.
///
/// Telemetry never changes what the caller sees: the original response or
/// error comes back untouched, and failures while reading the response are
/// recorded on the span instead of surfacing.
pub struct Interceptor {
    descriptor: &'static OperationDescriptor,
    config: Arc<InstrumentationConfig>,
}

impl Interceptor {
    pub fn new(descriptor: &'static OperationDescriptor, config: Arc<InstrumentationConfig>) -> Self {
        Self { descriptor, config }
    }

    pub fn descriptor(&self) -> &'static OperationDescriptor {
        self.descriptor
    }

    /// Run `call` inside a span. `call` is awaited inline, exactly once.
    pub async fn intercept<A, R, E, F>(&self, base_url: Option<&str>, args: &A, call: F) -> Result<R, E>
    where
        A: CallArgs + ?Sized,
        R: Normalize,
        E: Error,
        F: Future<Output = Result<R, E>>,
    {
        if args.is_streaming() {
            return call.await;
        }

        let d = self.descriptor;
        let server = ServerTarget::resolve(base_url, d.vendor);
        let model = args.model().unwrap_or(d.default_model).to_string();

        let mut span = CallSpan::start(&self.config.tracer, format!("{} {}", d.operation, model));
        if span.is_recording() {
            span.set(keys::GEN_AI_SYSTEM, d.vendor.system);
            span.set(keys::GEN_AI_OPERATION, d.operation.as_str());
            span.set(keys::GEN_AI_REQUEST_MODEL, model.clone());
            span.set(keys::SERVER_ADDRESS, server.address.clone());
            span.set(keys::SERVER_PORT, i64::from(server.port));
            span.set(keys::GEN_AI_ENDPOINT, server.endpoint());
        }

        let started = Instant::now();
        let outcome = call.with_context(span.context().clone()).await;
        let elapsed = started.elapsed();

        let mut usage = None;
        match &outcome {
            Ok(response) => {
                if span.is_recording() {
                    match self.extract(response, args, &model, &server, elapsed, &mut span) {
                        Ok(u) => usage = u,
                        Err(err) => {
                            tracing::debug!(
                                error = %err,
                                method = d.method,
                                "response attributes could not be extracted"
                            );
                            span.record_failure(&err);
                        }
                    }
                }
            }
            Err(err) => span.record_failure(err),
        }

        if let Some(metrics) = self.config.active_metrics() {
            let labels = [
                KeyValue::new(keys::GEN_AI_SYSTEM, d.vendor.system),
                KeyValue::new(keys::GEN_AI_OPERATION, d.operation.as_str()),
                KeyValue::new(keys::GEN_AI_REQUEST_MODEL, model.clone()),
                KeyValue::new(keys::SERVER_ADDRESS, server.address.clone()),
            ];
            metrics.record_duration(&labels, elapsed, outcome.is_err());
            if let Some(u) = usage {
                metrics.record_tokens(&labels, u.input, u.output);
            }
        }

        span.end();
        outcome
    }

    /// Normalize, then hand off to the descriptor's extractor. Token usage is
    /// returned for metrics when the response carries it.
    fn extract<A, R>(
        &self,
        response: &R,
        args: &A,
        model: &str,
        server: &ServerTarget,
        duration: Duration,
        span: &mut CallSpan,
    ) -> Result<Option<TokenUsage>, ExtractionError>
    where
        A: CallArgs + ?Sized,
        R: Normalize,
    {
        let normalized = response.normalize()?;
        let request = args.normalize_args()?;
        let ctx = ExtractContext {
            request_model: model,
            request: &request,
            server,
            duration,
            config: &self.config,
        };
        (self.descriptor.extractor)(&normalized, &ctx, span)?;
        TokenUsage::read(&normalized.fields())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnchorError;
    use crate::instrumentation::openai::{OPENAI, OPENAI_OPERATIONS};
    use crate::instrumentation::OperationType;
    use crate::telemetry::test_span::{SpanCapture, attr, attr_keys, install_capture, install_unsampled};
    use crate::telemetry::GenAiMetrics;
    use opentelemetry::Context;
    use opentelemetry::trace::{Status, TraceContextExt};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chat_interceptor(capture: &SpanCapture) -> Interceptor {
        Interceptor::new(
            &OPENAI_OPERATIONS[0],
            Arc::new(InstrumentationConfig::new(capture.tracer.clone())),
        )
    }

    fn completion() -> Value {
        json!({
            "id": "chatcmpl-abc123",
            "model": "gpt-4o-2024-08-06",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20}
        })
    }

    #[tokio::test]
    async fn success_produces_one_ok_span_with_baseline_attributes() {
        let capture = install_capture();
        let interceptor = chat_interceptor(&capture);
        let args = json!({"model": "gpt-4o-mini", "messages": []});

        let out: Result<Value, AnchorError> = interceptor
            .intercept(Some("https://api.openai.com/v1"), &args, async { Ok(completion()) })
            .await;
        assert_eq!(out.unwrap(), completion());

        let spans = capture.finished();
        assert_eq!(spans.len(), 1);
        let s = &spans[0];
        assert_eq!(s.name, "chat gpt-4o-mini");
        assert_eq!(s.status, Status::Ok);
        assert_eq!(attr(s, keys::GEN_AI_SYSTEM).unwrap().as_str(), "openai");
        assert_eq!(attr(s, keys::GEN_AI_OPERATION).unwrap().as_str(), "chat");
        assert_eq!(attr(s, keys::GEN_AI_REQUEST_MODEL).unwrap().as_str(), "gpt-4o-mini");
        assert_eq!(attr(s, keys::SERVER_ADDRESS).unwrap().as_str(), "api.openai.com");
        assert_eq!(attr(s, keys::SERVER_PORT), Some(&opentelemetry::Value::I64(443)));
        assert_eq!(attr(s, keys::GEN_AI_ENDPOINT).unwrap().as_str(), "api.openai.com:443");
        assert_eq!(attr(s, keys::GEN_AI_RESPONSE_ID).unwrap().as_str(), "chatcmpl-abc123");
    }

    #[tokio::test]
    async fn wrapped_call_runs_with_the_call_span_active() {
        let capture = install_capture();
        let interceptor = chat_interceptor(&capture);
        let mut seen = None;
        let out: Result<Value, AnchorError> = interceptor
            .intercept(None, &json!({"model": "gpt-4o"}), async {
                seen = Some(Context::current().span().span_context().clone());
                Ok(completion())
            })
            .await;
        assert!(out.is_ok());

        let inside = seen.expect("call ran");
        assert!(inside.is_valid());
        let spans = capture.finished();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].span_context.span_id(), inside.span_id());
        assert_eq!(spans[0].span_context.trace_id(), inside.trace_id());
        assert!(!Context::current().span().span_context().is_valid());
    }

    #[tokio::test]
    async fn missing_model_uses_descriptor_default() {
        let capture = install_capture();
        let interceptor = chat_interceptor(&capture);
        let _ = interceptor
            .intercept(None, &json!({"messages": []}), async {
                Ok::<_, AnchorError>(completion())
            })
            .await;
        let spans = capture.finished();
        assert_eq!(spans[0].name, "chat gpt-4o");
        assert_eq!(attr(&spans[0], keys::GEN_AI_REQUEST_MODEL).unwrap().as_str(), "gpt-4o");
    }

    #[tokio::test]
    async fn vendor_error_is_returned_unchanged_and_marks_span() {
        let capture = install_capture();
        let interceptor = chat_interceptor(&capture);
        let out: Result<Value, AnchorError> = interceptor
            .intercept(None, &json!({"model": "gpt-4o"}), async {
                Err(AnchorError::RateLimited {
                    provider: "openai".into(),
                    retry_after: Some(3),
                })
            })
            .await;

        match out {
            Err(AnchorError::RateLimited { retry_after, .. }) => assert_eq!(retry_after, Some(3)),
            other => panic!("expected RateLimited, got {other:?}"),
        }
        let spans = capture.finished();
        assert_eq!(spans.len(), 1);
        assert!(matches!(spans[0].status, Status::Error { .. }));
        assert!(spans[0].events.iter().any(|e| e.name == "exception"));
        assert!(attr(&spans[0], keys::GEN_AI_RESPONSE_ID).is_none());
    }

    #[tokio::test]
    async fn streaming_request_bypasses_span_and_passes_result_through() {
        let capture = install_capture();
        let interceptor = chat_interceptor(&capture);
        let calls = AtomicUsize::new(0);
        let out: Result<Value, AnchorError> = interceptor
            .intercept(None, &json!({"model": "gpt-4o", "stream": true}), async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"stream": "untouched"}))
            })
            .await;
        assert_eq!(out.unwrap(), json!({"stream": "untouched"}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(capture.finished().is_empty());
    }

    fn exploding_extractor(
        _: &crate::normalizer::NormalizedResponse,
        _: &ExtractContext<'_>,
        _: &mut CallSpan,
    ) -> Result<(), ExtractionError> {
        Err(ExtractionError::Normalize("extractor exploded".into()))
    }

    static FAILING: OperationDescriptor = OperationDescriptor {
        vendor: &OPENAI,
        method: "chat.completions.create",
        operation: OperationType::Chat,
        default_model: "gpt-4o",
        extractor: exploding_extractor,
    };

    #[tokio::test]
    async fn failing_extractor_still_returns_original_response() {
        let capture = install_capture();
        let interceptor = Interceptor::new(
            &FAILING,
            Arc::new(InstrumentationConfig::new(capture.tracer.clone())),
        );
        let out: Result<Value, AnchorError> = interceptor
            .intercept(None, &json!({"model": "gpt-4o"}), async { Ok(completion()) })
            .await;
        assert_eq!(out.unwrap(), completion());

        let spans = capture.finished();
        assert_eq!(spans.len(), 1);
        match &spans[0].status {
            Status::Error { description } => assert!(description.contains("extractor exploded")),
            other => panic!("expected error status, got {other:?}"),
        }
        assert!(spans[0].events.iter().any(|e| e.name == "exception"));
    }

    #[tokio::test]
    async fn malformed_response_is_recorded_not_raised() {
        let capture = install_capture();
        let interceptor = chat_interceptor(&capture);
        let weird = json!({"id": "x", "usage": "not-an-object"});
        let out: Result<Value, AnchorError> = interceptor
            .intercept(None, &json!({"model": "gpt-4o"}), async { Ok(weird.clone()) })
            .await;
        assert_eq!(out.unwrap(), weird);
        assert!(matches!(capture.finished()[0].status, Status::Error { .. }));
    }

    #[tokio::test]
    async fn unsampled_span_still_runs_the_call() {
        let capture = install_unsampled();
        let interceptor = chat_interceptor(&capture);
        let calls = AtomicUsize::new(0);
        let out: Result<Value, AnchorError> = interceptor
            .intercept(None, &json!({"model": "gpt-4o"}), async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(completion())
            })
            .await;
        assert!(out.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(capture.finished().is_empty());
    }

    #[tokio::test]
    async fn metrics_enabled_does_not_change_the_span() {
        let capture = install_capture();
        let config = InstrumentationConfig::new(capture.tracer.clone())
            .with_metrics(Some(Arc::new(GenAiMetrics::global())));
        let interceptor = Interceptor::new(&OPENAI_OPERATIONS[0], Arc::new(config));
        let _ = interceptor
            .intercept(None, &json!({"model": "gpt-4o"}), async {
                Ok::<_, AnchorError>(completion())
            })
            .await;
        let spans = capture.finished();
        assert_eq!(spans.len(), 1);
        assert!(attr_keys(&spans[0]).contains(&keys::GEN_AI_USAGE_INPUT_TOKENS.to_string()));
    }

    #[test]
    fn server_target_parsing() {
        let t = ServerTarget::resolve(Some("http://localhost:8080/v1"), &OPENAI);
        assert_eq!(t, ServerTarget { address: "localhost".into(), port: 8080 });

        let t = ServerTarget::resolve(Some("http://proxy.internal/v1"), &OPENAI);
        assert_eq!(t, ServerTarget { address: "proxy.internal".into(), port: 443 });

        let t = ServerTarget::resolve(Some("not a url"), &OPENAI);
        assert_eq!(t.endpoint(), "api.openai.com:443");

        let t = ServerTarget::resolve(None, &OPENAI);
        assert_eq!(t.endpoint(), "api.openai.com:443");
    }

    #[test]
    fn chat_descriptor_comes_first() {
        let d = &OPENAI_OPERATIONS[0];
        assert_eq!(d.operation, OperationType::Chat);
        assert_eq!(d.method, "chat.completions.create");
    }
}
