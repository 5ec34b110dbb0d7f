//! HTTP transport over a pooled `reqwest` client.
//!
//! `send` consumes a serialized [`HttpMessage`], issues the request with
//! retry over transient faults (configurable status codes plus network
//! errors), and records the response; `receive` replays recorded
//! responses as synthesized messages. A separate streaming path yields
//! body chunks as they arrive.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde_json::Value;

use crate::error::{HttpError, TransportError};
use crate::transport::http::message::HttpMessage;
use crate::transport::message::{Headers, Message};
use crate::transport::{ByteStream, RequestOptions, Transport};

/// Jitter applied to retry delays, to spread contending clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// Delay is exactly `factor * 2^attempt`.
    None,
    /// Random delay in `[0, calculated]`.
    Full,
    /// `calculated/2` plus random in `[0, calculated/2]`.
    Equal,
}

/// Configuration for [`HttpTransport`].
///
/// # Example
///
/// ```
/// use pynector::transport::http::HttpTransportConfig;
///
/// let config = HttpTransportConfig::new()
///     .with_base_url("https://api.example.com")
///     .with_max_retries(2);
/// assert_eq!(config.max_retries, 2);
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Prefix for relative request URLs.
    pub base_url: String,
    /// Default headers, merged under per-message headers.
    pub headers: Headers,
    /// Per-request transport timeout.
    pub timeout: Duration,
    /// Additional retry attempts after the first failure.
    pub max_retries: u32,
    /// Backoff multiplier `f`; retry `k` sleeps `f * 2^k`.
    pub retry_backoff_factor: f64,
    /// Statuses treated as transient.
    pub retry_status_codes: HashSet<u16>,
    /// Ceiling on a single backoff delay.
    pub max_retry_delay: Duration,
    /// Jitter applied to backoff delays.
    pub jitter: JitterStrategy,
    /// Whether redirects are followed.
    pub follow_redirects: bool,
    /// Whether TLS certificates are verified.
    pub verify_ssl: bool,
    /// Whether to speak HTTP/2 with prior knowledge.
    pub http2: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            headers: Headers::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_backoff_factor: 0.5,
            retry_status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
            max_retry_delay: Duration::from_secs(60),
            jitter: JitterStrategy::None,
            follow_redirects: true,
            verify_ssl: true,
            http2: false,
        }
    }
}

impl HttpTransportConfig {
    /// Create a config with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the default headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of additional retry attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff factor.
    pub fn with_retry_backoff_factor(mut self, factor: f64) -> Self {
        self.retry_backoff_factor = factor;
        self
    }

    /// Set the transient status codes.
    pub fn with_retry_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_status_codes = codes.into_iter().collect();
        self
    }

    /// Set the jitter strategy.
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff delay before retry `attempt` (0-indexed):
    /// `factor * 2^attempt`, capped, then jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.retry_backoff_factor * 2f64.powi(attempt as i32);
        let capped = base.min(self.max_retry_delay.as_secs_f64());
        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
        };
        Duration::from_secs_f64(jittered)
    }
}

enum Attempt {
    Success(HttpMessage),
    Retryable(TransportError),
    Fatal(TransportError),
}

/// HTTP transport backed by a pooled [`reqwest::Client`].
///
/// Safe under concurrent `send`/`stream_response` calls: the underlying
/// client multiplexes, and the response queue is internally locked.
pub struct HttpTransport {
    config: HttpTransportConfig,
    client: Mutex<Option<Client>>,
    responses: Mutex<VecDeque<HttpMessage>>,
}

impl HttpTransport {
    /// Create a transport with the given configuration. No connection
    /// state exists until [`Transport::connect`].
    pub fn new(config: HttpTransportConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            responses: Mutex::new(VecDeque::new()),
        }
    }

    /// The transport's configuration.
    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    fn current_client(&self) -> Result<Client, TransportError> {
        self.client
            .lock()
            .expect("http client slot poisoned")
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    /// Resolve a message URL against the configured base URL.
    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") || self.config.base_url.is_empty()
        {
            return url.to_string();
        }
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }

    /// Merge headers: config defaults, then message headers, then any
    /// `"headers"` object in the per-request options. Later wins per key.
    fn merged_headers(&self, message: &HttpMessage, options: &RequestOptions) -> Headers {
        let mut merged = self.config.headers.clone();
        for (k, v) in message.headers() {
            merged.insert(k.clone(), v.clone());
        }
        if let Some(Value::Object(extra)) = options.get("headers") {
            for (k, v) in extra {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    fn header_map(headers: &Headers) -> Result<HeaderMap, TransportError> {
        let mut map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| TransportError::Serialization(format!("invalid header name: {e}")))?;
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let value = HeaderValue::from_str(&text)
                .map_err(|e| TransportError::Serialization(format!("invalid header value: {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    /// Build the request for `message` with headers and options applied.
    fn build_request(
        &self,
        client: &Client,
        message: &HttpMessage,
        options: &RequestOptions,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        let method = Method::from_bytes(message.method().as_bytes())
            .map_err(|_| TransportError::Serialization(format!("invalid HTTP method: {}", message.method())))?;
        let url = self.resolve_url(message.url());

        let mut req = client.request(method, url);
        req = req.headers(Self::header_map(&self.merged_headers(message, options))?);

        if let Some(params) = message.params() {
            let pairs: Vec<(String, String)> = params
                .iter()
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), text)
                })
                .collect();
            req = req.query(&pairs);
        }
        if let Some(json) = message.json() {
            req = req.json(json);
        }
        if let Some(data) = message.form_data() {
            let pairs: Vec<(String, String)> = data
                .iter()
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), text)
                })
                .collect();
            req = req.form(&pairs);
        }
        if let Some(content) = message.content() {
            req = req.body(content.to_string());
        }
        if let Some(timeout) = options.get("timeout").and_then(Value::as_f64) {
            req = req.timeout(Duration::from_secs_f64(timeout));
        }
        Ok(req)
    }

    /// Classify a terminal non-success response per the error table.
    fn classify_response(status: u16, reason: String, retry_after: Option<Duration>) -> HttpError {
        match HttpError::from_status(status, reason) {
            HttpError::TooManyRequests { reason, .. } => {
                HttpError::TooManyRequests { reason, retry_after }
            }
            other => other,
        }
    }

    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    fn translate_reqwest(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::ConnectionTimeout(err.to_string())
        } else if err.is_connect() {
            TransportError::ConnectionRefused(err.to_string())
        } else {
            TransportError::Connection(err.to_string())
        }
    }

    fn response_headers(headers: &reqwest::header::HeaderMap) -> Headers {
        let mut out = Headers::new();
        for (name, value) in headers {
            if let Ok(text) = value.to_str() {
                out.insert(name.as_str().to_string(), Value::String(text.to_string()));
            }
        }
        out
    }

    async fn attempt(
        &self,
        client: &Client,
        message: &HttpMessage,
        options: &RequestOptions,
        retries_left: bool,
    ) -> Attempt {
        let req = match self.build_request(client, message, options) {
            Ok(req) => req,
            Err(err) => return Attempt::Fatal(err),
        };

        match req.send().await {
            Ok(resp) => {
                let status = resp.status();
                let code = status.as_u16();
                if self.config.retry_status_codes.contains(&code) {
                    let retry_after = Self::parse_retry_after(resp.headers());
                    let reason = status
                        .canonical_reason()
                        .unwrap_or("transient failure")
                        .to_string();
                    let err = Self::classify_response(code, reason, retry_after);
                    return if retries_left {
                        Attempt::Retryable(err.into())
                    } else {
                        Attempt::Fatal(err.into())
                    };
                }
                if code >= 400 {
                    let retry_after = Self::parse_retry_after(resp.headers());
                    let reason = resp.text().await.unwrap_or_default();
                    return Attempt::Fatal(
                        Self::classify_response(code, reason, retry_after).into(),
                    );
                }

                let headers = Self::response_headers(resp.headers());
                let body = match resp.bytes().await {
                    Ok(body) => body,
                    Err(err) => return Attempt::Fatal(Self::translate_reqwest(err)),
                };
                let data = serde_json::from_slice::<Value>(&body)
                    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
                Attempt::Success(HttpMessage::from_response(code, headers, data))
            }
            Err(err) => {
                let translated = Self::translate_reqwest(err);
                if retries_left {
                    Attempt::Retryable(translated)
                } else {
                    Attempt::Fatal(translated)
                }
            }
        }
    }

    /// Issue a streaming request and yield body chunks as they arrive.
    ///
    /// A non-2xx status at stream start fails immediately with
    /// [`HttpError::Transport`].
    pub async fn stream_response(
        &self,
        message: &HttpMessage,
        options: &RequestOptions,
    ) -> Result<ByteStream, TransportError> {
        let client = self.current_client()?;
        let resp = self
            .build_request(&client, message, options)?
            .send()
            .await
            .map_err(Self::translate_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(HttpError::Transport(format!(
                "HTTP request failed with status {}",
                status.as_u16()
            ))
            .into());
        }

        Ok(resp
            .bytes_stream()
            .map_err(|e| TransportError::Connection(e.to_string()))
            .boxed())
    }

    /// Number of recorded responses not yet drained by `receive`.
    pub fn pending_responses(&self) -> usize {
        self.responses
            .lock()
            .expect("http response queue poisoned")
            .len()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut slot = self.client.lock().expect("http client slot poisoned");
        if slot.is_some() {
            return Ok(());
        }

        let mut builder = Client::builder().timeout(self.config.timeout);
        builder = if self.config.follow_redirects {
            builder.redirect(reqwest::redirect::Policy::limited(10))
        } else {
            builder.redirect(reqwest::redirect::Policy::none())
        };
        if !self.config.verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if self.config.http2 {
            builder = builder.http2_prior_knowledge();
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Connection(format!("failed to establish connection: {e}")))?;
        *slot = Some(client);
        Ok(())
    }

    async fn disconnect(&self) {
        *self.client.lock().expect("http client slot poisoned") = None;
        self.responses
            .lock()
            .expect("http response queue poisoned")
            .clear();
    }

    async fn send(&self, payload: &[u8], options: &RequestOptions) -> Result<(), TransportError> {
        let client = self.current_client()?;
        let message = HttpMessage::deserialize(payload)?;

        let mut last_error: Option<TransportError> = None;
        for attempt_index in 0..=self.config.max_retries {
            if attempt_index > 0 {
                tokio::time::sleep(self.config.delay_for_attempt(attempt_index - 1)).await;
            }
            let retries_left = attempt_index < self.config.max_retries;
            match self.attempt(&client, &message, options, retries_left).await {
                Attempt::Success(response) => {
                    self.responses
                        .lock()
                        .expect("http response queue poisoned")
                        .push_back(response);
                    return Ok(());
                }
                Attempt::Retryable(err) => last_error = Some(err),
                Attempt::Fatal(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or(TransportError::Connection(
            "retry loop exited unexpectedly".into(),
        )))
    }

    async fn receive(&self) -> Result<ByteStream, TransportError> {
        self.current_client()?;
        let drained: Vec<HttpMessage> = self
            .responses
            .lock()
            .expect("http response queue poisoned")
            .drain(..)
            .collect();
        let chunks: Vec<Result<Bytes, TransportError>> = drained
            .into_iter()
            .map(|msg| msg.serialize().map(Bytes::from))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}
