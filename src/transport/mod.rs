//! Transport abstraction: the protocol contract, message framing, factory
//! registry, and the reference backends.
//!
//! A transport converts a request payload into bytes on some channel and
//! produces the response as a lazy chunk sequence. Backends translate
//! their internal failures into the crate error taxonomy exactly once, at
//! this boundary.

pub mod factory;
pub mod http;
pub mod message;
pub mod mock;
pub mod registry;
pub mod sdk;

pub use factory::{merge_options, TransportFactory};
pub use message::{BinaryMessage, JsonMessage, Message};
pub use mock::MockTransport;
pub use registry::TransportFactoryRegistry;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;

use crate::error::TransportError;

/// Per-request options: backend-interpreted key-value pairs.
///
/// The `"headers"` key, when present, holds a JSON object that factories
/// and transports merge key-wise; every other key is overwritten whole.
pub type RequestOptions = HashMap<String, Value>;

/// Lazy sequence of response byte chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// The transport protocol.
///
/// Lifecycle: `connect` → any number of `send`/`receive` cycles →
/// `disconnect`. `connect` is idempotent on an already-connected
/// transport; `disconnect` is idempotent and never fails; `send` and
/// `receive` require a connected transport and fail with
/// [`TransportError::NotConnected`] otherwise.
///
/// Methods take `&self`: implementations carry interior mutability so a
/// single transport can be shared (`Arc<dyn Transport>`) by a batch. A
/// backend that cannot serve concurrent operations guards itself
/// internally.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the underlying connection state.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Release the underlying resources.
    async fn disconnect(&self);

    /// Transmit one request payload.
    async fn send(&self, payload: &[u8], options: &RequestOptions) -> Result<(), TransportError>;

    /// Produce the response as a lazy chunk sequence.
    ///
    /// Finite for request/response backends; streaming backends may yield
    /// indefinitely.
    async fn receive(&self) -> Result<ByteStream, TransportError>;
}

/// Drain a [`ByteStream`] into one contiguous buffer.
pub async fn collect_chunks(mut stream: ByteStream) -> Result<Bytes, TransportError> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(buf))
}
