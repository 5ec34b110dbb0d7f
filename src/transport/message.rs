//! Message contract and the two reference wire formats.
//!
//! A message carries `headers` (string-keyed JSON values) and an opaque
//! payload. `deserialize(serialize(m))` must reproduce headers and payload
//! for any well-formed message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TransportError;

/// Header mapping: string keys, JSON values.
pub type Headers = Map<String, Value>;

/// The message contract.
///
/// Serialization must be total for valid messages; failures surface as
/// [`TransportError::Serialization`] / [`TransportError::Deserialization`].
pub trait Message: Sized + Send {
    /// The payload type; opaque to transports.
    type Payload;

    /// Serialize to wire bytes.
    fn serialize(&self) -> Result<Vec<u8>, TransportError>;

    /// Reconstruct a message from wire bytes.
    fn deserialize(data: &[u8]) -> Result<Self, TransportError>;

    /// The message headers.
    fn headers(&self) -> &Headers;

    /// The message payload.
    fn payload(&self) -> &Self::Payload;
}

/// JSON message: `{"headers": …, "payload": …}` as UTF-8 JSON.
///
/// # Example
///
/// ```
/// use pynector::transport::{JsonMessage, Message};
/// use serde_json::json;
///
/// let msg = JsonMessage::new(
///     [("content-type".to_string(), json!("application/json"))].into_iter().collect(),
///     json!({"id": 1}),
/// );
/// let bytes = msg.serialize().unwrap();
/// let back = JsonMessage::deserialize(&bytes).unwrap();
/// assert_eq!(back.payload(), msg.payload());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonMessage {
    headers: Headers,
    payload: Value,
}

impl JsonMessage {
    /// Create a message from headers and a JSON payload.
    pub fn new(headers: Headers, payload: Value) -> Self {
        Self { headers, payload }
    }
}

impl Message for JsonMessage {
    type Payload = Value;

    fn serialize(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::Serialization(e.to_string()))
    }

    fn deserialize(data: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(data).map_err(|e| TransportError::Deserialization(e.to_string()))
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn payload(&self) -> &Value {
        &self.payload
    }
}

/// Binary message: 4-byte big-endian header length, UTF-8 JSON headers,
/// then the raw payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMessage {
    headers: Headers,
    payload: Vec<u8>,
}

impl BinaryMessage {
    /// Create a message from headers and raw payload bytes.
    pub fn new(headers: Headers, payload: Vec<u8>) -> Self {
        Self { headers, payload }
    }
}

impl Message for BinaryMessage {
    type Payload = Vec<u8>;

    fn serialize(&self) -> Result<Vec<u8>, TransportError> {
        let header_json = serde_json::to_vec(&self.headers)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        let header_len = u32::try_from(header_json.len())
            .map_err(|_| TransportError::Serialization("header region too large".into()))?;

        let mut out = Vec::with_capacity(4 + header_json.len() + self.payload.len());
        out.extend_from_slice(&header_len.to_be_bytes());
        out.extend_from_slice(&header_json);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    fn deserialize(data: &[u8]) -> Result<Self, TransportError> {
        if data.len() < 4 {
            return Err(TransportError::Deserialization(
                "message too short: missing header length".into(),
            ));
        }
        let header_len =
            u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + header_len {
            return Err(TransportError::Deserialization(
                "message truncated: header region incomplete".into(),
            ));
        }
        let headers: Headers = serde_json::from_slice(&data[4..4 + header_len])
            .map_err(|e| TransportError::Deserialization(format!("Invalid header JSON: {e}")))?;
        Ok(Self {
            headers,
            payload: data[4 + header_len..].to_vec(),
        })
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn payload(&self) -> &Vec<u8> {
        &self.payload
    }
}
