use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::Stream;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::HttpCfg;
use crate::error::{AnchorError, CoreResult};

/// Represents a single Server-Sent-Event line (already split on `\n`).
#[derive(Debug, Clone)]
pub struct SseLine {
    pub line: String,
}

/// A boxed stream of `SseLine` results.
pub type SseStream = Pin<Box<dyn Stream<Item = CoreResult<SseLine>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and error mapping.
/// Errors are attributed to `provider`.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    provider: String,
    user_agent: String,
}

impl HttpClient {
    pub fn new(provider: &str, cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| AnchorError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            provider: provider.to_string(),
            user_agent: concat!("anchor/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    pub fn new_default(provider: &str) -> CoreResult<Self> {
        Self::new(provider, &HttpCfg::default())
    }

    fn post(&self, url: &str, headers: &[(&str, &str)]) -> RequestBuilder {
        let mut req = self.inner.post(url).header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> CoreResult<Response> {
        let resp = req.send().await.map_err(|_e| AnchorError::ProviderUnavailable {
            provider: self.provider.clone(),
        })?;
        let status = resp.status();
        if !status.is_success() {
            let ra = parse_retry_after(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error(&self.provider, status, ra, &text));
        }
        Ok(resp)
    }

    async fn decode<R: DeserializeOwned>(&self, resp: Response) -> CoreResult<R> {
        let status = resp.status();
        resp.json::<R>().await.map_err(|e| AnchorError::ProviderError {
            provider: self.provider.clone(),
            code: status.as_u16().to_string(),
            message: format!("json decode error: {e}"),
        })
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<R> {
        let resp = self.send(self.post(url, headers).json(body)).await?;
        self.decode(resp).await
    }

    /// POST a multipart form and decode a JSON reply.
    pub async fn post_multipart<R: DeserializeOwned>(
        &self,
        url: &str,
        form: reqwest::multipart::Form,
        headers: &[(&str, &str)],
    ) -> CoreResult<R> {
        let resp = self.send(self.post(url, headers).multipart(form)).await?;
        self.decode(resp).await
    }

    /// POST JSON and return the raw body with its content type.
    pub async fn post_bytes<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<(Bytes, Option<String>)> {
        let resp = self.send(self.post(url, headers).json(body)).await?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await.map_err(|_e| AnchorError::ProviderUnavailable {
            provider: self.provider.clone(),
        })?;
        Ok((body, content_type))
    }

    /// POST JSON and return an SSE (Server-Sent Events) line stream.
    /// Each yielded item is one raw line (trim not applied) from the SSE channel.
    pub async fn post_sse_lines<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<SseStream> {
        let req = self
            .post(url, headers)
            .json(body)
            .header("Accept", "text/event-stream");
        let resp = self.send(req).await?;

        // Stream body as bytes and split on '\n'
        let line_stream = LineStream::new(Box::pin(resp.bytes_stream()), self.provider.clone());
        Ok(Box::pin(line_stream))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // Non-numeric (HTTP-date) forms are ignored.
    None
}

fn map_http_error(provider: &str, status: StatusCode, retry_after: Option<u64>, body: &str) -> AnchorError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => AnchorError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        s if s.is_server_error() => AnchorError::ProviderUnavailable {
            provider: provider.to_string(),
        },
        s => AnchorError::ProviderError {
            provider: provider.to_string(),
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut t = s[..cut].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Internal line splitter over a bytes stream; yields `SseLine`s separated by '\n'.
struct LineStream {
    inner: ByteStream,
    provider: String,
    buf: String,
    flushed_tail: bool,
}

impl LineStream {
    fn new(inner: ByteStream, provider: String) -> Self {
        Self {
            inner,
            provider,
            buf: String::new(),
            flushed_tail: false,
        }
    }
}

impl Stream for LineStream {
    type Item = CoreResult<SseLine>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(idx) = self.buf.find('\n') {
                let mut line = self.buf.drain(..=idx).collect::<String>();
                line.truncate(line.trim_end_matches(['\n', '\r']).len());
                return Poll::Ready(Some(Ok(SseLine { line })));
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let s = String::from_utf8_lossy(&chunk);
                    self.buf.push_str(&s);
                }
                Poll::Ready(Some(Err(_e))) => {
                    return Poll::Ready(Some(Err(AnchorError::ProviderUnavailable {
                        provider: self.provider.clone(),
                    })));
                }
                Poll::Ready(None) => {
                    if !self.flushed_tail && !self.buf.is_empty() {
                        self.flushed_tail = true;
                        let line = std::mem::take(&mut self.buf);
                        return Poll::Ready(Some(Ok(SseLine { line })));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
