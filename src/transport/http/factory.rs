//! Factory for [`HttpTransport`]s.
//!
//! Holds default options and produces transports with per-call overrides
//! deep-merged over them (headers key-wise, scalars overwritten).

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;

use crate::error::{PynectorError, Result};
use crate::transport::factory::{merge_options, TransportFactory};
use crate::transport::http::transport::{HttpTransport, HttpTransportConfig};
use crate::transport::message::Headers;
use crate::transport::{RequestOptions, Transport};

/// Factory producing configured [`HttpTransport`]s.
///
/// # Example
///
/// ```
/// use pynector::transport::http::HttpTransportFactory;
/// use pynector::transport::TransportFactory;
/// use serde_json::json;
/// use std::collections::HashMap;
///
/// let factory = HttpTransportFactory::new(HashMap::from([
///     ("base_url".to_string(), json!("https://api.example.com")),
///     ("headers".to_string(), json!({"User-Agent": "pynector/0.1"})),
/// ]));
/// let transport = factory.create_transport(&HashMap::new()).unwrap();
/// # let _ = transport;
/// ```
#[derive(Default)]
pub struct HttpTransportFactory {
    defaults: RequestOptions,
}

impl HttpTransportFactory {
    /// Create a factory closing over `defaults`.
    pub fn new(defaults: RequestOptions) -> Self {
        Self { defaults }
    }

    /// Build a typed config from merged options. Unknown keys are
    /// ignored; wrongly-typed known keys are configuration errors.
    pub fn config_from_options(options: &RequestOptions) -> Result<HttpTransportConfig> {
        let mut config = HttpTransportConfig::default();

        if let Some(value) = options.get("base_url") {
            config.base_url = expect_string(value, "base_url")?;
        }
        if let Some(value) = options.get("headers") {
            config.headers = expect_headers(value)?;
        }
        if let Some(value) = options.get("timeout") {
            config.timeout = Duration::from_secs_f64(expect_number(value, "timeout")?);
        }
        if let Some(value) = options.get("max_retries") {
            config.max_retries = expect_number(value, "max_retries")? as u32;
        }
        if let Some(value) = options.get("retry_backoff_factor") {
            config.retry_backoff_factor = expect_number(value, "retry_backoff_factor")?;
        }
        if let Some(value) = options.get("retry_status_codes") {
            config.retry_status_codes = expect_status_set(value)?;
        }
        if let Some(value) = options.get("follow_redirects") {
            config.follow_redirects = expect_bool(value, "follow_redirects")?;
        }
        if let Some(value) = options.get("verify_ssl") {
            config.verify_ssl = expect_bool(value, "verify_ssl")?;
        }
        if let Some(value) = options.get("http2") {
            config.http2 = expect_bool(value, "http2")?;
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

fn expect_number(value: &Value, key: &str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| PynectorError::Configuration(format!("option '{key}' must be a number")))
}

fn expect_bool(value: &Value, key: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| PynectorError::Configuration(format!("option '{key}' must be a boolean")))
}

fn expect_headers(value: &Value) -> Result<Headers> {
    match value {
        Value::Object(map) => Ok(map.clone()),
        _ => Err(PynectorError::Configuration(
            "option 'headers' must be an object".into(),
        )),
    }
}

fn expect_status_set(value: &Value) -> Result<HashSet<u16>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|n| u16::try_from(n).ok())
                    .ok_or_else(|| {
                        PynectorError::Configuration(
                            "option 'retry_status_codes' must be a list of status codes".into(),
                        )
                    })
            })
            .collect(),
        _ => Err(PynectorError::Configuration(
            "option 'retry_status_codes' must be a list of status codes".into(),
        )),
    }
}

impl TransportFactory for HttpTransportFactory {
    fn create_transport(&self, overrides: &RequestOptions) -> Result<Box<dyn Transport>> {
        let merged = merge_options(&self.defaults, overrides);
        let config = Self::config_from_options(&merged)?;
        Ok(Box::new(HttpTransport::new(config)))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
