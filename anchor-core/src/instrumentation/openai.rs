use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::instrumentation::extractors::{extract_audio, extract_chat, extract_embedding, extract_image};
use crate::instrumentation::{HookTable, Instrumentor, OperationDescriptor, OperationType, Vendor};
use crate::model::{
    ChatCompletionOutput, ChatCompletionRequest, EmbeddingRequest, EmbeddingResponse,
    ImageGenerateRequest, ImageVariationRequest, ImagesResponse, SpeechRequest, SpeechResponse,
};
use crate::provider::{OpenAiApi, methods};
use crate::telemetry::keys;

pub static OPENAI: Vendor = Vendor {
    system: keys::SYSTEM_OPENAI,
    default_host: "api.openai.com",
    default_port: 443,
};

/// Every OpenAI method worth tracing. Methods missing from the linked
/// client's surface are skipped at install time.
pub static OPENAI_OPERATIONS: [OperationDescriptor; 7] = [
    OperationDescriptor {
        vendor: &OPENAI,
        method: methods::CHAT_COMPLETIONS_CREATE,
        operation: OperationType::Chat,
        default_model: "gpt-4o",
        extractor: extract_chat,
    },
    OperationDescriptor {
        vendor: &OPENAI,
        method: methods::CHAT_COMPLETIONS_PARSE,
        operation: OperationType::Chat,
        default_model: "gpt-4o",
        extractor: extract_chat,
    },
    OperationDescriptor {
        vendor: &OPENAI,
        method: methods::RESPONSES_CREATE,
        operation: OperationType::Chat,
        default_model: "gpt-4o",
        extractor: extract_chat,
    },
    OperationDescriptor {
        vendor: &OPENAI,
        method: methods::EMBEDDINGS_CREATE,
        operation: OperationType::Embedding,
        default_model: "text-embedding-ada-002",
        extractor: extract_embedding,
    },
    OperationDescriptor {
        vendor: &OPENAI,
        method: methods::IMAGES_GENERATE,
        operation: OperationType::Image,
        default_model: "dall-e-2",
        extractor: extract_image,
    },
    OperationDescriptor {
        vendor: &OPENAI,
        method: methods::IMAGES_CREATE_VARIATION,
        operation: OperationType::Image,
        default_model: "dall-e-2",
        extractor: extract_image,
    },
    OperationDescriptor {
        vendor: &OPENAI,
        method: methods::AUDIO_SPEECH_CREATE,
        operation: OperationType::Audio,
        default_model: "tts-1",
        extractor: extract_audio,
    },
];

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiInstrumentor;

impl Instrumentor for OpenAiInstrumentor {
    fn name(&self) -> &'static str {
        OPENAI.system
    }

    fn descriptors(&self) -> &'static [OperationDescriptor] {
        &OPENAI_OPERATIONS
    }

    #[cfg(feature = "openai")]
    fn client_surface(&self) -> CoreResult<&'static [&'static str]> {
        Ok(crate::provider::OPENAI_SURFACE)
    }

    #[cfg(not(feature = "openai"))]
    fn client_surface(&self) -> CoreResult<&'static [&'static str]> {
        Err(crate::error::AnchorError::DependencyMissing {
            vendor: OPENAI.system.to_string(),
            reason: "built without the `openai` feature".to_string(),
        })
    }
}

/// An [`OpenAiApi`] client whose calls go through whatever hooks are
/// installed in `hooks` at call time. With no hook for a method, the call
/// goes straight to the inner client.
pub struct InstrumentedOpenAi<C> {
    inner: C,
    hooks: Arc<HookTable>,
}

impl<C: OpenAiApi> InstrumentedOpenAi<C> {
    pub fn new(inner: C, hooks: Arc<HookTable>) -> Self {
        Self { inner, hooks }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C: OpenAiApi> OpenAiApi for InstrumentedOpenAi<C> {
    fn base_url(&self) -> Option<&str> {
        self.inner.base_url()
    }

    async fn chat_completions_create(
        &self,
        req: &ChatCompletionRequest,
    ) -> CoreResult<ChatCompletionOutput> {
        let call = self.inner.chat_completions_create(req);
        match self.hooks.lookup(OPENAI.system, methods::CHAT_COMPLETIONS_CREATE) {
            Some(hook) => hook.intercept(self.inner.base_url(), req, call).await,
            None => call.await,
        }
    }

    async fn embeddings_create(&self, req: &EmbeddingRequest) -> CoreResult<EmbeddingResponse> {
        let call = self.inner.embeddings_create(req);
        match self.hooks.lookup(OPENAI.system, methods::EMBEDDINGS_CREATE) {
            Some(hook) => hook.intercept(self.inner.base_url(), req, call).await,
            None => call.await,
        }
    }

    async fn images_generate(&self, req: &ImageGenerateRequest) -> CoreResult<ImagesResponse> {
        let call = self.inner.images_generate(req);
        match self.hooks.lookup(OPENAI.system, methods::IMAGES_GENERATE) {
            Some(hook) => hook.intercept(self.inner.base_url(), req, call).await,
            None => call.await,
        }
    }

    async fn images_create_variation(
        &self,
        req: &ImageVariationRequest,
    ) -> CoreResult<ImagesResponse> {
        let call = self.inner.images_create_variation(req);
        match self.hooks.lookup(OPENAI.system, methods::IMAGES_CREATE_VARIATION) {
            Some(hook) => hook.intercept(self.inner.base_url(), req, call).await,
            None => call.await,
        }
    }

    async fn audio_speech_create(&self, req: &SpeechRequest) -> CoreResult<SpeechResponse> {
        let call = self.inner.audio_speech_create(req);
        match self.hooks.lookup(OPENAI.system, methods::AUDIO_SPEECH_CREATE) {
            Some(hook) => hook.intercept(self.inner.base_url(), req, call).await,
            None => call.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnchorError;
    use crate::instrumentation::InstrumentationConfig;
    use crate::model::{ChatCompletionChunk, ChatMessage, ChunkChoice, ChunkDelta, Role};
    use crate::provider::NullOpenAi;
    use crate::telemetry::test_span::{SpanCapture, attr, install_capture};
    use futures::StreamExt;
    use opentelemetry::trace::Status;

    struct Failing;

    #[async_trait]
    impl OpenAiApi for Failing {
        fn base_url(&self) -> Option<&str> {
            Some("http://localhost:11434/v1")
        }
        async fn chat_completions_create(
            &self,
            _: &ChatCompletionRequest,
        ) -> CoreResult<ChatCompletionOutput> {
            Err(AnchorError::ProviderUnavailable { provider: "openai".into() })
        }
        async fn embeddings_create(&self, _: &EmbeddingRequest) -> CoreResult<EmbeddingResponse> {
            Err(AnchorError::Validation("bad input".into()))
        }
        async fn images_generate(&self, _: &ImageGenerateRequest) -> CoreResult<ImagesResponse> {
            Err(AnchorError::Validation("bad prompt".into()))
        }
        async fn images_create_variation(
            &self,
            _: &ImageVariationRequest,
        ) -> CoreResult<ImagesResponse> {
            Err(AnchorError::Validation("bad image".into()))
        }
        async fn audio_speech_create(&self, _: &SpeechRequest) -> CoreResult<SpeechResponse> {
            Err(AnchorError::Validation("bad voice".into()))
        }
    }

    /// Streams the given chunks for chat; everything else is canned.
    struct Streaming(Vec<ChatCompletionChunk>);

    #[async_trait]
    impl OpenAiApi for Streaming {
        async fn chat_completions_create(
            &self,
            _: &ChatCompletionRequest,
        ) -> CoreResult<ChatCompletionOutput> {
            let chunks = self.0.clone().into_iter().map(Ok);
            Ok(ChatCompletionOutput::Stream(futures::stream::iter(chunks).boxed()))
        }
        async fn embeddings_create(&self, req: &EmbeddingRequest) -> CoreResult<EmbeddingResponse> {
            NullOpenAi.embeddings_create(req).await
        }
        async fn images_generate(&self, req: &ImageGenerateRequest) -> CoreResult<ImagesResponse> {
            NullOpenAi.images_generate(req).await
        }
        async fn images_create_variation(
            &self,
            req: &ImageVariationRequest,
        ) -> CoreResult<ImagesResponse> {
            NullOpenAi.images_create_variation(req).await
        }
        async fn audio_speech_create(&self, req: &SpeechRequest) -> CoreResult<SpeechResponse> {
            NullOpenAi.audio_speech_create(req).await
        }
    }

    fn chunk(content: &str, finish_reason: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "chatcmpl-1".into(),
            model: "gpt-4o-mini".into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: Some(content.into()),
                },
                finish_reason: finish_reason.map(str::to_string),
            }],
            usage: None,
        }
    }

    fn installed(capture: &SpanCapture) -> Arc<HookTable> {
        let hooks = Arc::new(HookTable::new());
        let config = Arc::new(InstrumentationConfig::new(capture.tracer.clone()));
        OpenAiInstrumentor.install(config, &hooks).unwrap();
        hooks
    }

    fn chat_request() -> ChatCompletionRequest {
        ChatCompletionRequest::new("gpt-4o-mini", vec![ChatMessage::new(Role::User, "hello")])
    }

    #[test]
    fn install_hooks_only_methods_on_the_surface() {
        let capture = install_capture();
        let hooks = Arc::new(HookTable::new());
        let config = Arc::new(InstrumentationConfig::new(capture.tracer.clone()));
        assert_eq!(OpenAiInstrumentor.install(config, &hooks).unwrap(), 5);
        assert!(hooks.lookup("openai", methods::CHAT_COMPLETIONS_PARSE).is_none());
        assert!(hooks.lookup("openai", methods::RESPONSES_CREATE).is_none());
        assert!(hooks.lookup("openai", methods::AUDIO_SPEECH_CREATE).is_some());
    }

    #[tokio::test]
    async fn every_operation_emits_one_span() {
        let capture = install_capture();
        let client = InstrumentedOpenAi::new(NullOpenAi, installed(&capture));

        client.chat_completions_create(&chat_request()).await.unwrap();
        client
            .embeddings_create(&EmbeddingRequest {
                model: "text-embedding-3-small".into(),
                input: vec!["a".into()],
                ..Default::default()
            })
            .await
            .unwrap();
        client
            .images_generate(&ImageGenerateRequest {
                prompt: "a red fox".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        client
            .images_create_variation(&ImageVariationRequest {
                image: vec![1, 2, 3],
                ..Default::default()
            })
            .await
            .unwrap();
        client
            .audio_speech_create(&SpeechRequest {
                model: "tts-1".into(),
                input: "hi".into(),
                voice: "alloy".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let spans = capture.finished();
        let names: Vec<_> = spans.iter().map(|s| s.name.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "chat gpt-4o-mini",
                "embedding text-embedding-3-small",
                "image dall-e-2",
                "image dall-e-2",
                "audio tts-1",
            ]
        );
        assert!(spans.iter().all(|s| s.status == Status::Ok));
    }

    #[tokio::test]
    async fn vendor_errors_pass_through_with_error_spans() {
        let capture = install_capture();
        let client = InstrumentedOpenAi::new(Failing, installed(&capture));

        let err = client.chat_completions_create(&chat_request()).await.unwrap_err();
        assert!(matches!(err, AnchorError::ProviderUnavailable { .. }));

        let spans = capture.finished();
        assert_eq!(spans.len(), 1);
        assert!(matches!(spans[0].status, Status::Error { .. }));
        assert_eq!(attr(&spans[0], keys::SERVER_ADDRESS).unwrap().as_str(), "localhost");
        assert_eq!(
            attr(&spans[0], keys::SERVER_PORT),
            Some(&opentelemetry::Value::I64(11434))
        );
    }

    #[tokio::test]
    async fn streamed_chat_passes_through_untraced() {
        let capture = install_capture();
        let chunks = vec![chunk("Hel", None), chunk("lo", Some("stop"))];
        let client = InstrumentedOpenAi::new(Streaming(chunks.clone()), installed(&capture));

        let mut req = chat_request();
        req.stream = Some(true);
        let ChatCompletionOutput::Stream(stream) = client.chat_completions_create(&req).await.unwrap()
        else {
            panic!("expected a chunk stream");
        };
        let received: Vec<ChatCompletionChunk> = stream.map(Result::unwrap).collect().await;

        assert_eq!(received, chunks);
        assert!(capture.finished().is_empty());
    }

    #[tokio::test]
    async fn uninstall_restores_plain_calls() {
        let capture = install_capture();
        let hooks = installed(&capture);
        let client = InstrumentedOpenAi::new(NullOpenAi, hooks.clone());

        assert_eq!(OpenAiInstrumentor.uninstall(&hooks), 5);
        client.chat_completions_create(&chat_request()).await.unwrap();
        assert!(capture.finished().is_empty());
    }

    #[tokio::test]
    async fn reinstall_does_not_stack_spans() {
        let capture = install_capture();
        let hooks = installed(&capture);
        let config = Arc::new(InstrumentationConfig::new(capture.tracer.clone()));
        OpenAiInstrumentor.install(config, &hooks).unwrap();
        assert_eq!(hooks.len(), 5);

        let client = InstrumentedOpenAi::new(NullOpenAi, hooks);
        client.chat_completions_create(&chat_request()).await.unwrap();
        assert_eq!(capture.finished().len(), 1);
    }

    #[tokio::test]
    async fn boxed_dyn_client_can_be_wrapped() {
        let capture = install_capture();
        let inner: Box<dyn OpenAiApi> = Box::new(NullOpenAi);
        let client = InstrumentedOpenAi::new(inner, installed(&capture));
        client.chat_completions_create(&chat_request()).await.unwrap();
        assert_eq!(capture.finished().len(), 1);
    }
}
