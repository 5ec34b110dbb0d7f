//! SDK backend: adapters over vendor LLM clients behind the transport
//! contract, with vendor error translation at the boundary.

pub mod adapter;
pub mod factory;
pub mod sse;
pub mod transport;

pub use adapter::{AnthropicAdapter, OpenAiAdapter, SdkAdapter};
pub use factory::SdkTransportFactory;
pub use transport::{SdkTransport, SdkTransportConfig};
