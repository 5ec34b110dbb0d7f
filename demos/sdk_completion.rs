//! Prompt → completion through the SDK backend.
//!
//! Creates the transport via the registry, sends a prompt, and streams
//! the response chunks as they arrive.
//!
//! Run: `ANTHROPIC_API_KEY=... cargo run --example sdk_completion`

use std::collections::HashMap;

use futures::StreamExt;
use pynector::transport::{Transport, TransportFactoryRegistry};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let api_key = std::env::var("ANTHROPIC_API_KEY")?;

    let registry = TransportFactoryRegistry::with_defaults();
    let transport = registry.create_transport(
        "sdk",
        &HashMap::from([
            ("sdk_type".to_string(), json!("anthropic")),
            ("api_key".to_string(), json!(api_key)),
            ("model".to_string(), json!("claude-3-opus-20240229")),
            ("prompt".to_string(), json!("Name three uses for a transport abstraction.")),
        ]),
    )?;

    transport.connect().await?;

    let mut stream = transport.receive().await?;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        print!("{}", String::from_utf8_lossy(&chunk));
    }
    println!();

    transport.disconnect().await;
    Ok(())
}
