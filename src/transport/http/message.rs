//! HTTP request/response message.
//!
//! An [`HttpMessage`] describes one HTTP exchange: method, URL (resolved
//! against the transport's `base_url`), and the optional request parts.
//! On the wire it uses the JSON message layout
//! (`{"headers": …, "payload": …}`), so it travels through the
//! byte-oriented transport contract unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TransportError;
use crate::transport::message::{Headers, Message};

/// One HTTP exchange description.
///
/// Only the parts that were explicitly provided serialize onto the wire
/// and reach the request builder.
///
/// # Example
///
/// ```
/// use pynector::transport::http::HttpMessage;
/// use serde_json::json;
///
/// let msg = HttpMessage::new("POST", "/items")
///     .with_json(json!({"name": "widget"}))
///     .with_header("X-Request-Id", json!("abc-123"));
/// assert_eq!(msg.method(), "POST");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpMessage {
    #[serde(default)]
    headers: Headers,
    payload: HttpPayload,
}

/// The HTTP request parts carried by an [`HttpMessage`]. Opaque to the
/// transport contract; use the accessors on the message itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HttpPayload {
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl HttpMessage {
    /// Create a message for `method` and `url`.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            headers: Headers::new(),
            payload: HttpPayload {
                method: method.into(),
                url: url.into(),
                ..Default::default()
            },
        }
    }

    /// Replace the message headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Insert a single header.
    pub fn with_header(mut self, key: impl Into<String>, value: Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// Set the query parameters.
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.payload.params = Some(params);
        self
    }

    /// Set a JSON body.
    pub fn with_json(mut self, json: Value) -> Self {
        self.payload.json = Some(json);
        self
    }

    /// Set form data.
    pub fn with_form_data(mut self, data: Map<String, Value>) -> Self {
        self.payload.data = Some(data);
        self
    }

    /// Set a raw string body.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.payload.content = Some(content.into());
        self
    }

    /// The HTTP method.
    pub fn method(&self) -> &str {
        &self.payload.method
    }

    /// The request URL, relative to the transport's `base_url`.
    pub fn url(&self) -> &str {
        &self.payload.url
    }

    /// Query parameters, if provided.
    pub fn params(&self) -> Option<&Map<String, Value>> {
        self.payload.params.as_ref()
    }

    /// JSON body, if provided.
    pub fn json(&self) -> Option<&Value> {
        self.payload.json.as_ref()
    }

    /// Form data, if provided.
    pub fn form_data(&self) -> Option<&Map<String, Value>> {
        self.payload.data.as_ref()
    }

    /// Raw string body, if provided.
    pub fn content(&self) -> Option<&str> {
        self.payload.content.as_deref()
    }

    /// Build the synthesized response message the transport emits from a
    /// recorded HTTP response: headers are the response headers, payload
    /// carries `status_code`, `headers`, and `data`.
    pub fn from_response(status: u16, headers: Headers, data: Value) -> Self {
        let mut payload_obj = Map::new();
        payload_obj.insert("status_code".into(), Value::from(status));
        payload_obj.insert("headers".into(), Value::Object(headers.clone()));
        payload_obj.insert("data".into(), data);
        Self {
            headers,
            payload: HttpPayload {
                method: String::new(),
                url: String::new(),
                json: Some(Value::Object(payload_obj)),
                ..Default::default()
            },
        }
    }
}

impl Message for HttpMessage {
    type Payload = HttpPayload;

    fn serialize(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::Serialization(e.to_string()))
    }

    fn deserialize(data: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(data).map_err(|e| TransportError::Deserialization(e.to_string()))
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn payload(&self) -> &HttpPayload {
        &self.payload
    }
}
