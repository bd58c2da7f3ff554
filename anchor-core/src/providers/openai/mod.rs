use async_trait::async_trait;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use crate::config::HttpCfg;
use crate::error::{AnchorError, CoreResult};
use crate::http_client::HttpClient;
use crate::model::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionOutput, ChatCompletionRequest,
    EmbeddingRequest, EmbeddingResponse, ImageGenerateRequest, ImageVariationRequest,
    ImagesResponse, SpeechRequest, SpeechResponse,
};
use crate::provider::OpenAiApi;

pub const DEFAULT_BASE: &str = "https://api.openai.com";
const PROVIDER: &str = "openai";

/// HTTP client for the OpenAI REST API.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: HttpClient,
    base: String,
    org: Option<String>,
    api_key: SecretString,
}

impl OpenAiClient {
    pub fn new(http: HttpClient, api_key: SecretString, base: String, org: Option<String>) -> Self {
        Self {
            http,
            api_key,
            // Endpoints carry their own `/v1`; accept SDK-style bases that include it.
            base: base
                .trim_end_matches('/')
                .trim_end_matches("/v1")
                .to_string(),
            org,
        }
    }

    /// Reads `OPENAI_API_KEY` (required), `OPENAI_BASE_URL` and `OPENAI_ORG_ID`.
    pub fn from_env(cfg: &HttpCfg) -> CoreResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AnchorError::Validation("OPENAI_API_KEY is not set".into()))?;
        let base = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE.to_string());
        let org = std::env::var("OPENAI_ORG_ID").ok();
        Ok(Self::new(
            HttpClient::new(PROVIDER, cfg)?,
            SecretString::from(api_key),
            base,
            org,
        ))
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        Self::new(
            HttpClient::new_default(PROVIDER).unwrap(),
            SecretString::from("test-key"),
            server_base.to_string(),
            None,
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut h = vec![(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key.expose_secret()),
        )];
        if let Some(org) = &self.org {
            h.push(("OpenAI-Organization".into(), org.clone()));
        }
        h
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.base)
    }
}

/// Borrowed header view for the http helpers.
fn header_refs(owned: &[(String, String)]) -> Vec<(&str, &str)> {
    owned.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

/// Parse one SSE line of a chat stream. Comments, blank lines and the
/// terminating `[DONE]` marker yield nothing.
fn parse_sse_chunk(line: &str) -> Option<CoreResult<ChatCompletionChunk>> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(
        serde_json::from_str::<ChatCompletionChunk>(data).map_err(|e| AnchorError::ProviderError {
            provider: PROVIDER.into(),
            code: "stream".into(),
            message: format!("chunk decode error: {e}"),
        }),
    )
}

#[async_trait]
impl OpenAiApi for OpenAiClient {
    fn base_url(&self) -> Option<&str> {
        Some(&self.base)
    }

    async fn chat_completions_create(
        &self,
        req: &ChatCompletionRequest,
    ) -> CoreResult<ChatCompletionOutput> {
        let owned = self.headers();
        let hdrs = header_refs(&owned);
        let url = self.url("chat/completions");

        if req.stream.unwrap_or(false) {
            let lines = self.http.post_sse_lines(&url, req, &hdrs).await?;
            let chunks = lines.filter_map(|line| async move {
                match line {
                    Ok(l) => parse_sse_chunk(&l.line),
                    Err(e) => Some(Err(e)),
                }
            });
            return Ok(ChatCompletionOutput::Stream(Box::pin(chunks)));
        }

        let completion: ChatCompletion = self.http.post_json(&url, req, &hdrs).await?;
        Ok(ChatCompletionOutput::Completion(completion))
    }

    async fn embeddings_create(&self, req: &EmbeddingRequest) -> CoreResult<EmbeddingResponse> {
        let owned = self.headers();
        self.http
            .post_json(&self.url("embeddings"), req, &header_refs(&owned))
            .await
    }

    async fn images_generate(&self, req: &ImageGenerateRequest) -> CoreResult<ImagesResponse> {
        let owned = self.headers();
        self.http
            .post_json(&self.url("images/generations"), req, &header_refs(&owned))
            .await
    }

    async fn images_create_variation(
        &self,
        req: &ImageVariationRequest,
    ) -> CoreResult<ImagesResponse> {
        use reqwest::multipart::{Form, Part};

        let image = Part::bytes(req.image.clone()).file_name("image.png");
        let mut form = Form::new().part("image", image);
        if let Some(model) = &req.model {
            form = form.text("model", model.clone());
        }
        if let Some(n) = req.n {
            form = form.text("n", n.to_string());
        }
        if let Some(size) = &req.size {
            form = form.text("size", size.clone());
        }
        if let Some(fmt) = &req.response_format {
            form = form.text("response_format", fmt.clone());
        }

        let owned = self.headers();
        self.http
            .post_multipart(&self.url("images/variations"), form, &header_refs(&owned))
            .await
    }

    async fn audio_speech_create(&self, req: &SpeechRequest) -> CoreResult<SpeechResponse> {
        let owned = self.headers();
        let (audio, content_type) = self
            .http
            .post_bytes(&self.url("audio/speech"), req, &header_refs(&owned))
            .await?;
        Ok(SpeechResponse {
            content_type,
            audio: audio.to_vec(),
        })
    }
}
