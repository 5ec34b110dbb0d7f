//! HTTP backend: request building, transient-fault retry, streaming
//! bodies, and status-code error mapping.

pub mod factory;
pub mod message;
pub mod transport;

pub use factory::HttpTransportFactory;
pub use message::{HttpMessage, HttpPayload};
pub use transport::{HttpTransport, HttpTransportConfig, JitterStrategy};
