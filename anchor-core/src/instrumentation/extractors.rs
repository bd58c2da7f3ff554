//! Per-operation readers that turn a normalized response into span attributes.
//!
//! Extractors only write what the response or arguments actually carry:
//! an absent field is never written as zero or empty. A field of the wrong
//! shape is an [`ExtractionError`], which the interceptor records on the span.

use std::time::Duration;

use serde_json::Value;

use crate::error::ExtractionError;
use crate::instrumentation::{InstrumentationConfig, ServerTarget};
use crate::normalizer::{Fields, NormalizedResponse, RequestParams};
use crate::telemetry::{CallSpan, keys};

/// What an extractor knows about the call besides the response.
pub struct ExtractContext<'a> {
    pub request_model: &'a str,
    pub request: &'a RequestParams,
    pub server: &'a ServerTarget,
    pub duration: Duration,
    pub config: &'a InstrumentationConfig,
}

pub type Extractor =
    fn(&NormalizedResponse, &ExtractContext<'_>, &mut CallSpan) -> Result<(), ExtractionError>;

/// Token counts of a response's `usage` block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: Option<i64>,
    pub output: Option<i64>,
    pub total: Option<i64>,
    pub reasoning: Option<i64>,
}

impl TokenUsage {
    /// `Ok(None)` when the response has no usage block.
    pub fn read(response: &Fields<'_>) -> Result<Option<Self>, ExtractionError> {
        let Some(usage) = response.object("usage")? else {
            return Ok(None);
        };
        let reasoning = match usage.int("reasoning_tokens")? {
            Some(n) => Some(n),
            None => match usage.object("completion_tokens_details")? {
                Some(details) => details.int("reasoning_tokens")?,
                None => None,
            },
        };
        Ok(Some(Self {
            input: usage.int("prompt_tokens")?,
            output: usage.int("completion_tokens")?,
            total: usage.int("total_tokens")?,
            reasoning,
        }))
    }

    fn record(&self, span: &mut CallSpan) {
        let pairs = [
            (keys::GEN_AI_USAGE_INPUT_TOKENS, self.input),
            (keys::GEN_AI_USAGE_OUTPUT_TOKENS, self.output),
            (keys::GEN_AI_USAGE_TOTAL_TOKENS, self.total),
            (keys::GEN_AI_USAGE_REASONING_TOKENS, self.reasoning),
        ];
        for (key, value) in pairs {
            if let Some(n) = value {
                span.set(key, n);
            }
        }
    }
}

fn record_duration(ctx: &ExtractContext<'_>, span: &mut CallSpan) {
    span.set(keys::GEN_AI_CLIENT_OPERATION_DURATION, ctx.duration.as_secs_f64());
}

fn record_cost(model: &str, usage: &TokenUsage, ctx: &ExtractContext<'_>, span: &mut CallSpan) {
    if let Some(cost) = ctx.config.pricing.cost(model, usage.input, usage.output) {
        span.set(keys::GEN_AI_USAGE_COST, cost);
    }
}

/// JSON scalar as an attribute value; arrays and objects keep their JSON text.
fn attribute_value(value: &Value) -> opentelemetry::Value {
    match value {
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.into(),
            None => n.as_f64().unwrap_or_default().into(),
        },
        Value::String(s) => s.clone().into(),
        other => other.to_string().into(),
    }
}

/// Text of a message `content`: a plain string, or the text parts of a
/// multi-part content array joined by newlines.
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            (!texts.is_empty()).then(|| texts.join("\n"))
        }
        _ => None,
    }
}

fn record_request_messages(ctx: &ExtractContext<'_>, span: &mut CallSpan) -> Result<(), ExtractionError> {
    let Some(messages) = ctx.request.fields().array("messages")? else {
        return Ok(());
    };
    for (i, message) in messages.iter().enumerate() {
        let message = Fields::of(message, "messages")?;
        let prefix = match message.str("role")? {
            Some("user") => keys::GEN_AI_USER_MESSAGE,
            Some("system") => keys::GEN_AI_SYSTEM_MESSAGE,
            _ => continue,
        };
        if let Some(text) = message.get("content").and_then(content_text) {
            span.set(keys::indexed(prefix, i), text);
        }
    }
    Ok(())
}

pub fn extract_chat(
    response: &NormalizedResponse,
    ctx: &ExtractContext<'_>,
    span: &mut CallSpan,
) -> Result<(), ExtractionError> {
    if !span.is_recording() {
        return Ok(());
    }
    let fields = response.fields();
    record_duration(ctx, span);

    if let Some(id) = fields.str("id")? {
        span.set(keys::GEN_AI_RESPONSE_ID, id.to_string());
    }
    let response_model = fields.str("model")?;
    if let Some(model) = response_model {
        span.set(keys::GEN_AI_RESPONSE_MODEL, model.to_string());
    }
    if let Some(fp) = fields.str("system_fingerprint")? {
        span.set(keys::GEN_AI_SYSTEM_FINGERPRINT, fp.to_string());
    }

    if let Some(usage) = TokenUsage::read(&fields)? {
        usage.record(span);
        record_cost(response_model.unwrap_or(ctx.request_model), &usage, ctx, span);
    }

    let choices = fields.array("choices")?.unwrap_or_default();
    let mut finish_reasons = Vec::new();
    for (i, choice) in choices.iter().enumerate() {
        let choice = Fields::of(choice, "choices")?;
        if let Some(reason) = choice.str("finish_reason")? {
            finish_reasons.push(reason);
        }
        if ctx.config.capture_message_content {
            let text = choice
                .object("message")?
                .and_then(|m| m.get("content"))
                .and_then(content_text);
            if let Some(text) = text {
                span.set(keys::indexed(keys::GEN_AI_ASSISTANT_MESSAGE, i), text);
            }
        }
    }
    if !finish_reasons.is_empty() {
        span.set(keys::GEN_AI_RESPONSE_FINISH_REASONS, finish_reasons.join(","));
    }

    if ctx.config.capture_message_content {
        record_request_messages(ctx, span)?;
    }

    let request = ctx.request.fields();
    for (arg, key) in keys::REQUEST_PARAMS {
        if let Some(value) = request.get(arg) {
            span.set(key, attribute_value(value));
        }
    }
    Ok(())
}

pub fn extract_embedding(
    response: &NormalizedResponse,
    ctx: &ExtractContext<'_>,
    span: &mut CallSpan,
) -> Result<(), ExtractionError> {
    if !span.is_recording() {
        return Ok(());
    }
    let fields = response.fields();
    record_duration(ctx, span);

    let response_model = fields.str("model")?;
    if let Some(model) = response_model {
        span.set(keys::GEN_AI_RESPONSE_MODEL, model.to_string());
    }
    if let Some(usage) = TokenUsage::read(&fields)? {
        if let Some(n) = usage.input {
            span.set(keys::GEN_AI_USAGE_INPUT_TOKENS, n);
        }
        if let Some(n) = usage.total {
            span.set(keys::GEN_AI_USAGE_TOTAL_TOKENS, n);
        }
        record_cost(response_model.unwrap_or(ctx.request_model), &usage, ctx, span);
    }
    if let Some(data) = fields.array("data")? {
        span.set(keys::GEN_AI_EMBEDDING_COUNT, data.len() as i64);
    }
    Ok(())
}

pub fn extract_image(
    response: &NormalizedResponse,
    ctx: &ExtractContext<'_>,
    span: &mut CallSpan,
) -> Result<(), ExtractionError> {
    if !span.is_recording() {
        return Ok(());
    }
    record_duration(ctx, span);
    if let Some(data) = response.fields().array("data")? {
        span.set(keys::GEN_AI_IMAGE_COUNT, data.len() as i64);
    }
    Ok(())
}

pub fn extract_audio(
    _response: &NormalizedResponse,
    ctx: &ExtractContext<'_>,
    span: &mut CallSpan,
) -> Result<(), ExtractionError> {
    if span.is_recording() {
        record_duration(ctx, span);
    }
    Ok(())
}
