//! Vendor LLM client adapters.
//!
//! An adapter turns a prompt into a completion (or a token stream) against
//! one vendor API, translating vendor failures into the SDK error taxonomy
//! at this boundary. Two references: OpenAI-style chat completions and
//! Anthropic-style messages, both speaking SSE for streaming.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::{SdkError, TransportError};
use crate::transport::sdk::sse::SseDecoder;
use crate::transport::{ByteStream, RequestOptions};

/// Abstraction over vendor LLM clients.
///
/// Object-safe; the SDK transport holds one as `Arc<dyn SdkAdapter>`.
#[async_trait]
pub trait SdkAdapter: Send + Sync {
    /// Execute a prompt → completion call and return the generated text.
    async fn complete(
        &self,
        prompt: &str,
        model: Option<&str>,
        options: &RequestOptions,
    ) -> Result<String, TransportError>;

    /// Execute a streaming call, yielding UTF-8 token chunks.
    async fn stream(
        &self,
        prompt: &str,
        model: Option<&str>,
        options: &RequestOptions,
    ) -> Result<ByteStream, TransportError>;

    /// Vendor name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Translate a vendor HTTP status into the SDK taxonomy.
pub(crate) fn translate_status(status: u16, body: String) -> SdkError {
    match status {
        401 => SdkError::Authentication(format!("Authentication failed: {body}")),
        403 => SdkError::Permission(body),
        404 => SdkError::ResourceNotFound(body),
        400 | 422 => SdkError::InvalidRequest(body),
        413 => SdkError::RequestTooLarge(body),
        429 => SdkError::RateLimit(format!("Rate limit exceeded: {body}")),
        _ => SdkError::Transport(format!("HTTP {status}: {body}")),
    }
}

/// Translate a vendor connection failure into the transport taxonomy.
pub(crate) fn translate_request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::ConnectionTimeout(err.to_string())
    } else if err.is_connect() {
        TransportError::ConnectionRefused(err.to_string())
    } else {
        TransportError::Connection(err.to_string())
    }
}

fn sampling_params(options: &RequestOptions) -> (Option<f64>, Option<u64>) {
    (
        options.get("temperature").and_then(Value::as_f64),
        options.get("max_tokens").and_then(Value::as_u64),
    )
}

async fn fail_on_status(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = resp.status().as_u16();
    if status >= 400 {
        let body = resp.text().await.unwrap_or_default();
        return Err(TransportError::Sdk(translate_status(status, body)));
    }
    Ok(resp)
}

/// Adapter for OpenAI-style chat APIs (`/v1/chat/completions`).
///
/// Also covers the many OpenAI-compatible providers that speak the same
/// wire format.
pub struct OpenAiAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiAdapter {
    /// Default model when neither the call nor the transport names one.
    pub const DEFAULT_MODEL: &'static str = "gpt-4o";

    /// Create an adapter against `base_url` (no trailing path).
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    fn build_body(prompt: &str, model: Option<&str>, options: &RequestOptions, stream: bool) -> Value {
        let (temperature, max_tokens) = sampling_params(options);
        let mut body = json!({
            "model": model.unwrap_or(Self::DEFAULT_MODEL),
            "messages": [{"role": "user", "content": prompt}],
            "stream": stream,
        });
        if let Some(t) = temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = max_tokens {
            body["max_tokens"] = json!(n);
        }
        body
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let mut req = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        req
    }

    fn delta_text(event_data: &Value) -> Option<&str> {
        event_data
            .get("choices")?
            .get(0)?
            .get("delta")?
            .get("content")?
            .as_str()
    }
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

#[async_trait]
impl SdkAdapter for OpenAiAdapter {
    async fn complete(
        &self,
        prompt: &str,
        model: Option<&str>,
        options: &RequestOptions,
    ) -> Result<String, TransportError> {
        let body = Self::build_body(prompt, model, options, false);
        let resp = self
            .request(&body)
            .send()
            .await
            .map_err(translate_request_error)?;
        let resp = fail_on_status(resp).await?;

        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| TransportError::Deserialization(e.to_string()))?;
        Ok(parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn stream(
        &self,
        prompt: &str,
        model: Option<&str>,
        options: &RequestOptions,
    ) -> Result<ByteStream, TransportError> {
        let body = Self::build_body(prompt, model, options, true);
        let resp = self
            .request(&body)
            .send()
            .await
            .map_err(translate_request_error)?;
        let resp = fail_on_status(resp).await?;

        let mut decoder = SseDecoder::new();
        Ok(resp
            .bytes_stream()
            .map_err(|e| TransportError::Connection(e.to_string()))
            .map(move |chunk| -> Vec<Result<Bytes, TransportError>> {
                match chunk {
                    Ok(chunk) => decoder
                        .decode(&chunk)
                        .into_iter()
                        .filter_map(|event| {
                            Self::delta_text(&event.data)
                                .filter(|t| !t.is_empty())
                                .map(|t| Ok(Bytes::from(t.to_string())))
                        })
                        .collect(),
                    Err(err) => vec![Err(err)],
                }
            })
            .flat_map(stream::iter)
            .boxed())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Adapter for the Anthropic messages API (`/v1/messages`).
pub struct AnthropicAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl AnthropicAdapter {
    /// Default model when neither the call nor the transport names one.
    pub const DEFAULT_MODEL: &'static str = "claude-3-opus-20240229";
    const API_VERSION: &'static str = "2023-06-01";
    const DEFAULT_MAX_TOKENS: u64 = 1024;

    /// Create an adapter against `base_url` (no trailing path).
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    fn build_body(prompt: &str, model: Option<&str>, options: &RequestOptions, stream: bool) -> Value {
        let (temperature, max_tokens) = sampling_params(options);
        let mut body = json!({
            "model": model.unwrap_or(Self::DEFAULT_MODEL),
            "max_tokens": max_tokens.unwrap_or(Self::DEFAULT_MAX_TOKENS),
            "messages": [{"role": "user", "content": prompt}],
            "stream": stream,
        });
        if let Some(t) = temperature {
            body["temperature"] = json!(t);
        }
        body
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let mut req = self
            .client
            .post(url)
            .header("anthropic-version", Self::API_VERSION)
            .json(body);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key.as_str());
        }
        req
    }

    fn delta_text(event: &crate::transport::sdk::sse::SseEvent) -> Option<&str> {
        if event.event.as_deref() != Some("content_block_delta") {
            return None;
        }
        let delta = event.data.get("delta")?;
        if delta.get("type").and_then(Value::as_str) != Some("text_delta") {
            return None;
        }
        delta.get("text")?.as_str()
    }
}

impl std::fmt::Debug for AnthropicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAdapter")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

#[async_trait]
impl SdkAdapter for AnthropicAdapter {
    async fn complete(
        &self,
        prompt: &str,
        model: Option<&str>,
        options: &RequestOptions,
    ) -> Result<String, TransportError> {
        let body = Self::build_body(prompt, model, options, false);
        let resp = self
            .request(&body)
            .send()
            .await
            .map_err(translate_request_error)?;
        let resp = fail_on_status(resp).await?;

        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| TransportError::Deserialization(e.to_string()))?;
        Ok(parsed
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn stream(
        &self,
        prompt: &str,
        model: Option<&str>,
        options: &RequestOptions,
    ) -> Result<ByteStream, TransportError> {
        let body = Self::build_body(prompt, model, options, true);
        let resp = self
            .request(&body)
            .send()
            .await
            .map_err(translate_request_error)?;
        let resp = fail_on_status(resp).await?;

        let mut decoder = SseDecoder::new();
        Ok(resp
            .bytes_stream()
            .map_err(|e| TransportError::Connection(e.to_string()))
            .map(move |chunk| -> Vec<Result<Bytes, TransportError>> {
                match chunk {
                    Ok(chunk) => decoder
                        .decode(&chunk)
                        .into_iter()
                        .filter_map(|event| {
                            Self::delta_text(&event)
                                .filter(|t| !t.is_empty())
                                .map(|t| Ok(Bytes::from(t.to_string())))
                        })
                        .collect(),
                    Err(err) => vec![Err(err)],
                }
            })
            .flat_map(stream::iter)
            .boxed())
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}
