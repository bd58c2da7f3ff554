use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::model::{
    ChatChoice, ChatCompletion, ChatCompletionOutput, ChatCompletionRequest, ChatMessage,
    CompletionUsage, Embedding, EmbeddingRequest, EmbeddingResponse, EmbeddingUsage, ImageData,
    ImageGenerateRequest, ImageVariationRequest, ImagesResponse, Role, SpeechRequest,
    SpeechResponse,
};

/// Method identities on the OpenAI client surface. Hooks are keyed by these.
pub mod methods {
    pub const CHAT_COMPLETIONS_CREATE: &str = "chat.completions.create";
    pub const CHAT_COMPLETIONS_PARSE: &str = "chat.completions.parse";
    pub const RESPONSES_CREATE: &str = "responses.create";
    pub const EMBEDDINGS_CREATE: &str = "embeddings.create";
    pub const IMAGES_GENERATE: &str = "images.generate";
    pub const IMAGES_CREATE_VARIATION: &str = "images.create_variation";
    pub const AUDIO_SPEECH_CREATE: &str = "audio.speech.create";
}

/// Methods [`OpenAiApi`] exposes. Anything else an instrumentor knows about
/// is not interceptable in this build.
pub const OPENAI_SURFACE: &[&str] = &[
    methods::CHAT_COMPLETIONS_CREATE,
    methods::EMBEDDINGS_CREATE,
    methods::IMAGES_GENERATE,
    methods::IMAGES_CREATE_VARIATION,
    methods::AUDIO_SPEECH_CREATE,
];

/// The OpenAI client surface that instrumentation wraps.
#[async_trait]
pub trait OpenAiApi: Send + Sync {
    /// Base URL the client talks to, when it knows one.
    fn base_url(&self) -> Option<&str> {
        None
    }

    async fn chat_completions_create(
        &self,
        req: &ChatCompletionRequest,
    ) -> CoreResult<ChatCompletionOutput>;

    async fn embeddings_create(&self, req: &EmbeddingRequest) -> CoreResult<EmbeddingResponse>;

    async fn images_generate(&self, req: &ImageGenerateRequest) -> CoreResult<ImagesResponse>;

    async fn images_create_variation(
        &self,
        req: &ImageVariationRequest,
    ) -> CoreResult<ImagesResponse>;

    async fn audio_speech_create(&self, req: &SpeechRequest) -> CoreResult<SpeechResponse>;
}

macro_rules! forward_openai_api {
    ($ty:ty) => {
        #[async_trait]
        impl<T: OpenAiApi + ?Sized> OpenAiApi for $ty {
            fn base_url(&self) -> Option<&str> {
                (**self).base_url()
            }
            async fn chat_completions_create(
                &self,
                req: &ChatCompletionRequest,
            ) -> CoreResult<ChatCompletionOutput> {
                (**self).chat_completions_create(req).await
            }
            async fn embeddings_create(
                &self,
                req: &EmbeddingRequest,
            ) -> CoreResult<EmbeddingResponse> {
                (**self).embeddings_create(req).await
            }
            async fn images_generate(
                &self,
                req: &ImageGenerateRequest,
            ) -> CoreResult<ImagesResponse> {
                (**self).images_generate(req).await
            }
            async fn images_create_variation(
                &self,
                req: &ImageVariationRequest,
            ) -> CoreResult<ImagesResponse> {
                (**self).images_create_variation(req).await
            }
            async fn audio_speech_create(&self, req: &SpeechRequest) -> CoreResult<SpeechResponse> {
                (**self).audio_speech_create(req).await
            }
        }
    };
}

forward_openai_api!(Box<T>);
forward_openai_api!(Arc<T>);

/// A client that never leaves the process and returns canned responses.
/// Useful for tests, offline smoke runs, or as a placeholder.
#[derive(Debug, Clone, Default)]
pub struct NullOpenAi;

#[async_trait]
impl OpenAiApi for NullOpenAi {
    async fn chat_completions_create(
        &self,
        req: &ChatCompletionRequest,
    ) -> CoreResult<ChatCompletionOutput> {
        let prompt: usize = req
            .messages
            .iter()
            .filter_map(|m| m.content.as_deref())
            .map(str::len)
            .sum();
        let prompt = prompt as u32;
        Ok(ChatCompletionOutput::Completion(ChatCompletion {
            id: "null-completion".into(),
            object: Some("chat.completion".into()),
            created: Some(0),
            model: req.model.clone(),
            system_fingerprint: None,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::new(Role::Assistant, "[null provider response]"),
                finish_reason: Some("stop".into()),
            }],
            usage: Some(CompletionUsage {
                prompt_tokens: Some(prompt),
                completion_tokens: Some(0),
                total_tokens: Some(prompt),
                completion_tokens_details: None,
            }),
        }))
    }

    async fn embeddings_create(&self, req: &EmbeddingRequest) -> CoreResult<EmbeddingResponse> {
        Ok(EmbeddingResponse {
            data: (0..req.input.len())
                .map(|i| Embedding {
                    index: i as u32,
                    embedding: vec![0.0_f32; 3],
                })
                .collect(),
            model: req.model.clone(),
            usage: Some(EmbeddingUsage {
                prompt_tokens: Some(req.input.len() as u32),
                total_tokens: Some(req.input.len() as u32),
            }),
        })
    }

    async fn images_generate(&self, req: &ImageGenerateRequest) -> CoreResult<ImagesResponse> {
        Ok(null_images(req.n))
    }

    async fn images_create_variation(
        &self,
        req: &ImageVariationRequest,
    ) -> CoreResult<ImagesResponse> {
        Ok(null_images(req.n))
    }

    async fn audio_speech_create(&self, _req: &SpeechRequest) -> CoreResult<SpeechResponse> {
        Ok(SpeechResponse {
            content_type: Some("audio/mpeg".into()),
            audio: Vec::new(),
        })
    }
}

fn null_images(n: Option<u32>) -> ImagesResponse {
    ImagesResponse {
        created: 0,
        data: (0..n.unwrap_or(1))
            .map(|_| ImageData {
                url: Some("null://image".into()),
                ..Default::default()
            })
            .collect(),
    }
}
