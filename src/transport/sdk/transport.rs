//! SDK transport: the transport contract over a vendor LLM adapter.
//!
//! `send` runs a prompt → completion call and stores the result;
//! `receive` runs the streaming call for the configured prompt and yields
//! UTF-8 chunks at the adapter's natural event boundaries. Single-request:
//! internal state is behind an async mutex.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::TransportError;
use crate::transport::sdk::adapter::{AnthropicAdapter, OpenAiAdapter, SdkAdapter};
use crate::transport::{ByteStream, RequestOptions, Transport};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_PROMPT: &str = "Hello";

/// Configuration for [`SdkTransport`].
#[derive(Debug, Clone)]
pub struct SdkTransportConfig {
    /// Which vendor to adapt: `"openai"` or `"anthropic"`.
    pub sdk_type: String,
    /// Vendor API key.
    pub api_key: Option<String>,
    /// Override for the vendor base URL.
    pub base_url: Option<String>,
    /// Request timeout for the vendor client.
    pub timeout: Duration,
    /// Model identifier passed to the adapter.
    pub model: Option<String>,
    /// Prompt used by `receive` when streaming.
    pub prompt: Option<String>,
}

impl Default for SdkTransportConfig {
    fn default() -> Self {
        Self {
            sdk_type: "openai".to_string(),
            api_key: None,
            base_url: None,
            timeout: Duration::from_secs(60),
            model: None,
            prompt: None,
        }
    }
}

struct SdkState {
    adapter: Option<Arc<dyn SdkAdapter>>,
    last_prompt: Option<String>,
    last_completion: Option<String>,
}

/// Transport adapting vendor LLM clients to the transport contract.
///
/// # Example
///
/// ```no_run
/// use pynector::transport::sdk::{SdkTransport, SdkTransportConfig};
/// use pynector::transport::Transport;
/// use std::collections::HashMap;
///
/// # tokio_test::block_on(async {
/// let transport = SdkTransport::new(SdkTransportConfig {
///     sdk_type: "anthropic".into(),
///     api_key: Some("key".into()),
///     model: Some("claude-3-opus-20240229".into()),
///     ..Default::default()
/// });
/// transport.connect().await.unwrap();
/// transport.send(b"Explain transports.", &HashMap::new()).await.unwrap();
/// # });
/// ```
pub struct SdkTransport {
    config: SdkTransportConfig,
    state: Mutex<SdkState>,
}

impl SdkTransport {
    /// Create a transport with the given configuration. The vendor
    /// adapter is instantiated at `connect`.
    pub fn new(config: SdkTransportConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SdkState {
                adapter: None,
                last_prompt: None,
                last_completion: None,
            }),
        }
    }

    /// The transport's configuration.
    pub fn config(&self) -> &SdkTransportConfig {
        &self.config
    }

    /// The completion stored by the most recent `send`, if any.
    pub async fn last_completion(&self) -> Option<String> {
        self.state.lock().await.last_completion.clone()
    }

    /// Swap in an adapter directly. Test seam; `connect` becomes a no-op
    /// for the adapter slot once one is present.
    pub async fn set_adapter(&self, adapter: Arc<dyn SdkAdapter>) {
        self.state.lock().await.adapter = Some(adapter);
    }

    fn build_adapter(&self) -> Result<Arc<dyn SdkAdapter>, TransportError> {
        let client = Client::builder()
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        match self.config.sdk_type.as_str() {
            "openai" => {
                let base = self.config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
                Ok(Arc::new(OpenAiAdapter::new(
                    client,
                    base,
                    self.config.api_key.clone(),
                )))
            }
            "anthropic" => {
                let base = self
                    .config
                    .base_url
                    .as_deref()
                    .unwrap_or(ANTHROPIC_BASE_URL);
                Ok(Arc::new(AnthropicAdapter::new(
                    client,
                    base,
                    self.config.api_key.clone(),
                )))
            }
            other => Err(TransportError::Connection(format!(
                "Unsupported SDK type: {other}"
            ))),
        }
    }

    fn model_for(&self, options: &RequestOptions) -> Option<String> {
        options
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.config.model.clone())
    }
}

#[async_trait]
impl Transport for SdkTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.adapter.is_some() {
            return Ok(());
        }
        state.adapter = Some(self.build_adapter()?);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        state.adapter = None;
        state.last_prompt = None;
        state.last_completion = None;
    }

    async fn send(&self, payload: &[u8], options: &RequestOptions) -> Result<(), TransportError> {
        let adapter = {
            let state = self.state.lock().await;
            state.adapter.clone().ok_or(TransportError::NotConnected)?
        };
        let prompt = std::str::from_utf8(payload)
            .map_err(|e| TransportError::Serialization(format!("prompt is not UTF-8: {e}")))?
            .to_string();
        let model = self.model_for(options);

        let completion = adapter.complete(&prompt, model.as_deref(), options).await?;

        let mut state = self.state.lock().await;
        state.last_prompt = Some(prompt);
        state.last_completion = Some(completion);
        Ok(())
    }

    async fn receive(&self) -> Result<ByteStream, TransportError> {
        let (adapter, prompt) = {
            let state = self.state.lock().await;
            let adapter = state.adapter.clone().ok_or(TransportError::NotConnected)?;
            let prompt = self
                .config
                .prompt
                .clone()
                .or_else(|| state.last_prompt.clone())
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string());
            (adapter, prompt)
        };
        let model = self.config.model.clone();

        adapter
            .stream(&prompt, model.as_deref(), &RequestOptions::new())
            .await
    }
}
