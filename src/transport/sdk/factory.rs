//! Factory for [`SdkTransport`]s.

use std::time::Duration;

use serde_json::Value;

use crate::error::{PynectorError, Result};
use crate::transport::factory::{merge_options, TransportFactory};
use crate::transport::sdk::transport::{SdkTransport, SdkTransportConfig};
use crate::transport::{RequestOptions, Transport};

/// Factory producing configured [`SdkTransport`]s.
#[derive(Default)]
pub struct SdkTransportFactory {
    defaults: RequestOptions,
}

impl SdkTransportFactory {
    /// Create a factory closing over `defaults`.
    pub fn new(defaults: RequestOptions) -> Self {
        Self { defaults }
    }

    /// Build a typed config from merged options.
    pub fn config_from_options(options: &RequestOptions) -> Result<SdkTransportConfig> {
        let mut config = SdkTransportConfig::default();

        if let Some(value) = options.get("sdk_type") {
            config.sdk_type = expect_string(value, "sdk_type")?;
        }
        if let Some(value) = options.get("api_key") {
            config.api_key = Some(expect_string(value, "api_key")?);
        }
        if let Some(value) = options.get("base_url") {
            config.base_url = Some(expect_string(value, "base_url")?);
        }
        if let Some(value) = options.get("timeout") {
            let seconds = value.as_f64().ok_or_else(|| {
                PynectorError::Configuration("option 'timeout' must be a number".into())
            })?;
            config.timeout = Duration::from_secs_f64(seconds);
        }
        if let Some(value) = options.get("model") {
            config.model = Some(expect_string(value, "model")?);
        }
        if let Some(value) = options.get("prompt") {
            config.prompt = Some(expect_string(value, "prompt")?);
        }

        Ok(config)
    }
}

fn expect_string(value: &Value, key: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PynectorError::Configuration(format!("option '{key}' must be a string")))
}

impl TransportFactory for SdkTransportFactory {
    fn create_transport(&self, overrides: &RequestOptions) -> Result<Box<dyn Transport>> {
        let merged = merge_options(&self.defaults, overrides);
        let config = Self::config_from_options(&merged)?;
        Ok(Box::new(SdkTransport::new(config)))
    }

    fn name(&self) -> &'static str {
        "sdk"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn options(pairs: &[(&str, Value)]) -> RequestOptions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_factory_default_config() {
        let config = SdkTransportFactory::config_from_options(&HashMap::new()).unwrap();
        assert_eq!(config.sdk_type, "openai");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.api_key.is_none());
        assert!(config.model.is_none());
    }

    #[test]
    fn test_factory_custom_config() {
        let merged = options(&[
            ("sdk_type", json!("anthropic")),
            ("api_key", json!("test-key")),
            ("base_url", json!("https://example.com")),
            ("timeout", json!(30.0)),
            ("model", json!("claude-3-opus-20240229")),
            ("prompt", json!("Summarize.")),
        ]);
        let config = SdkTransportFactory::config_from_options(&merged).unwrap();
        assert_eq!(config.sdk_type, "anthropic");
        assert_eq!(config.api_key.as_deref(), Some("test-key"));
        assert_eq!(config.base_url.as_deref(), Some("https://example.com"));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.model.as_deref(), Some("claude-3-opus-20240229"));
        assert_eq!(config.prompt.as_deref(), Some("Summarize."));
    }

    #[test]
    fn test_factory_defaults_merge_under_overrides() {
        let factory = SdkTransportFactory::new(options(&[
            ("sdk_type", json!("openai")),
            ("model", json!("gpt-4o")),
        ]));
        let merged = merge_options(&factory.defaults, &options(&[("model", json!("gpt-4o-mini"))]));
        let config = SdkTransportFactory::config_from_options(&merged).unwrap();
        assert_eq!(config.sdk_type, "openai");
        assert_eq!(config.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn test_factory_rejects_bad_types() {
        let bad = options(&[("sdk_type", json!(42))]);
        assert!(SdkTransportFactory::config_from_options(&bad).is_err());
    }

    #[test]
    fn test_factory_creates_transport() {
        let factory = SdkTransportFactory::default();
        assert!(factory.create_transport(&HashMap::new()).is_ok());
    }
}
