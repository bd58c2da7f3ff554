//! Turn vendor responses and call arguments into plain string-keyed maps.
//!
//! Extractors only ever read from a [`Normalized`] map, so they work the same
//! whether the client handed back a typed struct, a raw JSON value or a binary
//! payload. Each response shape gets its own [`Normalize`] impl.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ExtractionError;
use crate::model::{
    ChatCompletion, ChatCompletionOutput, ChatCompletionRequest, EmbeddingRequest,
    EmbeddingResponse, ImageGenerateRequest, ImageVariationRequest, ImagesResponse, SpeechRequest,
    SpeechResponse,
};

/// String → JSON value map built from a response or a call's arguments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Normalized {
    map: Map<String, Value>,
}

pub type NormalizedResponse = Normalized;
pub type RequestParams = Normalized;

impl Normalized {
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self { map }
    }

    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, ExtractionError> {
        match serde_json::to_value(value).map_err(|e| ExtractionError::Normalize(e.to_string()))? {
            Value::Object(map) => Ok(Self { map }),
            _ => Err(ExtractionError::NotAnObject),
        }
    }

    pub fn fields(&self) -> Fields<'_> {
        Fields { map: &self.map }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.map
    }
}

/// Typed, borrowed view of one object level. Null counts as absent; a value
/// of the wrong type is an error.
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    /// View an arbitrary JSON value as an object; `field` names it in errors.
    pub fn of(value: &'a Value, field: &str) -> Result<Self, ExtractionError> {
        value
            .as_object()
            .map(|map| Fields { map })
            .ok_or_else(|| ExtractionError::shape(field, "an object"))
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    pub fn str(&self, key: &str) -> Result<Option<&'a str>, ExtractionError> {
        self.get(key)
            .map(|v| v.as_str().ok_or_else(|| ExtractionError::shape(key, "a string")))
            .transpose()
    }

    pub fn int(&self, key: &str) -> Result<Option<i64>, ExtractionError> {
        self.get(key)
            .map(|v| v.as_i64().ok_or_else(|| ExtractionError::shape(key, "an integer")))
            .transpose()
    }

    pub fn array(&self, key: &str) -> Result<Option<&'a [Value]>, ExtractionError> {
        self.get(key)
            .map(|v| {
                v.as_array()
                    .map(Vec::as_slice)
                    .ok_or_else(|| ExtractionError::shape(key, "an array"))
            })
            .transpose()
    }

    pub fn object(&self, key: &str) -> Result<Option<Fields<'a>>, ExtractionError> {
        self.get(key).map(|v| Fields::of(v, key)).transpose()
    }
}

/// Per-shape adapter from a vendor response to a [`Normalized`] map.
pub trait Normalize {
    fn normalize(&self) -> Result<Normalized, ExtractionError>;
}

impl Normalize for ChatCompletion {
    fn normalize(&self) -> Result<Normalized, ExtractionError> {
        Normalized::from_serialize(self)
    }
}

impl Normalize for ChatCompletionOutput {
    fn normalize(&self) -> Result<Normalized, ExtractionError> {
        match self {
            Self::Completion(c) => c.normalize(),
            Self::Stream(_) => Err(ExtractionError::Normalize(
                "streamed output has no response body".into(),
            )),
        }
    }
}

impl Normalize for EmbeddingResponse {
    fn normalize(&self) -> Result<Normalized, ExtractionError> {
        Normalized::from_serialize(self)
    }
}

impl Normalize for ImagesResponse {
    fn normalize(&self) -> Result<Normalized, ExtractionError> {
        Normalized::from_serialize(self)
    }
}

impl Normalize for SpeechResponse {
    fn normalize(&self) -> Result<Normalized, ExtractionError> {
        let mut map = Map::new();
        map.insert("byte_length".into(), Value::from(self.audio.len()));
        if let Some(ct) = &self.content_type {
            map.insert("content_type".into(), Value::from(ct.as_str()));
        }
        Ok(Normalized::from_map(map))
    }
}

impl Normalize for Value {
    fn normalize(&self) -> Result<Normalized, ExtractionError> {
        match self {
            Value::Object(map) => Ok(Normalized::from_map(map.clone())),
            _ => Err(ExtractionError::NotAnObject),
        }
    }
}

/// Arguments of an interceptable call.
pub trait CallArgs: Serialize {
    /// The explicitly requested model; empty counts as unset.
    fn model(&self) -> Option<&str>;

    fn is_streaming(&self) -> bool {
        false
    }

    fn normalize_args(&self) -> Result<RequestParams, ExtractionError> {
        Normalized::from_serialize(self)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    Some(s).filter(|s| !s.trim().is_empty())
}

impl CallArgs for ChatCompletionRequest {
    fn model(&self) -> Option<&str> {
        non_empty(&self.model)
    }

    fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

impl CallArgs for EmbeddingRequest {
    fn model(&self) -> Option<&str> {
        non_empty(&self.model)
    }
}

impl CallArgs for ImageGenerateRequest {
    fn model(&self) -> Option<&str> {
        self.model.as_deref().and_then(non_empty)
    }
}

impl CallArgs for ImageVariationRequest {
    fn model(&self) -> Option<&str> {
        self.model.as_deref().and_then(non_empty)
    }
}

impl CallArgs for SpeechRequest {
    fn model(&self) -> Option<&str> {
        non_empty(&self.model)
    }
}

/// Untyped arguments, as a JSON object.
impl CallArgs for Value {
    fn model(&self) -> Option<&str> {
        self.get("model").and_then(Value::as_str).and_then(non_empty)
    }

    fn is_streaming(&self) -> bool {
        self.get("stream").and_then(Value::as_bool).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatMessage, Role};
    use serde_json::json;

    #[test]
    fn null_fields_read_as_absent() {
        let n = json!({"id": null, "model": "gpt-4o"}).normalize().unwrap();
        let f = n.fields();
        assert_eq!(f.str("id").unwrap(), None);
        assert_eq!(f.str("model").unwrap(), Some("gpt-4o"));
        assert_eq!(f.int("missing").unwrap(), None);
    }

    #[test]
    fn wrong_shapes_are_errors() {
        let n = json!({"usage": "lots", "id": 7, "choices": {}}).normalize().unwrap();
        let f = n.fields();
        assert!(matches!(f.object("usage"), Err(ExtractionError::Shape { .. })));
        assert!(matches!(f.str("id"), Err(ExtractionError::Shape { .. })));
        assert!(matches!(f.array("choices"), Err(ExtractionError::Shape { .. })));
    }

    #[test]
    fn non_object_values_do_not_normalize() {
        assert!(matches!(json!([1, 2]).normalize(), Err(ExtractionError::NotAnObject)));
    }

    #[test]
    fn typed_completion_normalizes_without_unset_fields() {
        let c: ChatCompletion = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-2024-08-06",
            "choices": [],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
        }))
        .unwrap();
        let n = c.normalize().unwrap();
        assert!(!n.as_map().contains_key("system_fingerprint"));
        let usage = n.fields().object("usage").unwrap().unwrap();
        assert_eq!(usage.int("total_tokens").unwrap(), Some(7));
        assert!(usage.get("completion_tokens_details").is_none());
    }

    #[test]
    fn speech_normalizes_to_payload_summary() {
        let s = SpeechResponse {
            content_type: Some("audio/mpeg".into()),
            audio: vec![0; 42],
        };
        let n = s.normalize().unwrap();
        assert_eq!(n.fields().int("byte_length").unwrap(), Some(42));
        assert_eq!(n.fields().str("content_type").unwrap(), Some("audio/mpeg"));
    }

    #[test]
    fn call_args_report_model_and_streaming() {
        let mut req = ChatCompletionRequest::new("", vec![ChatMessage::new(Role::User, "hi")]);
        assert_eq!(req.model(), None);
        assert!(!req.is_streaming());
        req.model = "gpt-4o-mini".into();
        req.stream = Some(true);
        assert_eq!(req.model(), Some("gpt-4o-mini"));
        assert!(req.is_streaming());

        let raw = json!({"model": "dall-e-3", "stream": false});
        assert_eq!(raw.model(), Some("dall-e-3"));
        assert!(!raw.is_streaming());

        let img = ImageGenerateRequest::default();
        assert_eq!(img.model(), None);
    }

    #[test]
    fn request_params_keep_only_set_arguments() {
        let mut req = ChatCompletionRequest::new("gpt-4o", vec![]);
        req.temperature = Some(0.2);
        let p = req.normalize_args().unwrap();
        assert!(p.fields().get("temperature").is_some());
        assert!(p.fields().get("seed").is_none());
    }
}
