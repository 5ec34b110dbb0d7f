//! # Pynector
//!
//! Async client for dispatching requests through pluggable network
//! transports, with structured concurrency, batch dispatch, and retry
//! over transient failures.
//!
//! ## Core Concepts
//!
//! - **[`Pynector`]** — the client dispatcher: `request`,
//!   `batch_request` (bounded parallelism, per-request isolation),
//!   `request_with_retry` (exponential backoff), scoped transport
//!   acquisition, `close`.
//! - **[`Transport`](transport::Transport)** — the backend contract:
//!   connect/disconnect lifecycle, `send`, and a lazy chunked `receive`.
//!   Reference backends: HTTP over `reqwest` with transient-fault retry
//!   and streaming, and an LLM-SDK backend adapting vendor chat APIs.
//! - **[`concurrency`]** — task groups, cancel scopes (`move_on_after`
//!   swallows the deadline, `fail_after` surfaces it), resource
//!   primitives, and reusable patterns (connection pool, worker pool,
//!   bounded fan-out, retry-with-timeout).
//! - **[`PynectorError`]** — the umbrella error; transports classify
//!   their failures into the taxonomy exactly once, at the backend
//!   boundary.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pynector::transport::http::HttpMessage;
//! use pynector::transport::Message;
//! use pynector::Pynector;
//! use serde_json::json;
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Pynector::builder()
//!         .transport_type("http")
//!         .transport_option("base_url", json!("https://api.example.com"))
//!         .transport_option("headers", json!({"User-Agent": "pynector/0.1"}))
//!         .build()?;
//!
//!     let message = HttpMessage::new("GET", "/status");
//!     let body = client
//!         .request(&message.serialize()?, None, &HashMap::new())
//!         .await?;
//!     println!("{}", String::from_utf8_lossy(&body));
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Batches
//!
//! ```no_run
//! use pynector::{BatchOptions, Pynector};
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! # async fn run(client: Pynector, payloads: Vec<Vec<u8>>) {
//! let requests = payloads
//!     .into_iter()
//!     .map(|p| (p, HashMap::new()))
//!     .collect();
//! let results = client
//!     .batch_request(
//!         requests,
//!         BatchOptions {
//!             max_concurrency: Some(8),
//!             timeout: Some(Duration::from_secs(30)),
//!             ..Default::default()
//!         },
//!     )
//!     .await
//!     .unwrap();
//! // Slot i always corresponds to request i; each slot is a success
//! // value or an error from the taxonomy.
//! # let _ = results;
//! # }
//! ```

pub mod client;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod transport;

pub use client::{BatchItem, BatchOptions, Pynector, PynectorBuilder};
pub use concurrency::{
    fail_after, move_on_after, parallel_requests, retry_with_timeout, shield, CancelScope,
    CapacityLimiter, Condition, ConnectionPool, Event, Lock, Semaphore, TaskGroup, WorkerPool,
};
pub use error::{HttpError, PynectorError, Result, SdkError, TransportError};
pub use telemetry::{get_telemetry, Logger, NoopLogger, NoopTracer, Span, Tracer};
pub use transport::{
    BinaryMessage, JsonMessage, Message, MockTransport, Transport, TransportFactory,
    TransportFactoryRegistry,
};
