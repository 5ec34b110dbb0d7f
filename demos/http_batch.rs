//! Batch dispatch over the HTTP backend.
//!
//! Sends a handful of requests against one base URL with bounded
//! concurrency and a batch deadline, then prints each slot.
//!
//! Run: `cargo run --example http_batch -- https://httpbin.org`

use std::collections::HashMap;
use std::time::Duration;

use pynector::transport::http::HttpMessage;
use pynector::transport::Message;
use pynector::{BatchOptions, Pynector};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let base_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://httpbin.org".to_string());

    let client = Pynector::builder()
        .transport_type("http")
        .transport_option("base_url", json!(base_url))
        .transport_option("headers", json!({"User-Agent": "pynector-demo/0.1"}))
        .transport_option("max_retries", json!(2))
        .build()?;

    let requests = (1..=5)
        .map(|i| {
            let message = HttpMessage::new("GET", format!("/get?item={i}"));
            (message.serialize().expect("serialize request"), HashMap::new())
        })
        .collect();

    let results = client
        .batch_request(
            requests,
            BatchOptions {
                max_concurrency: Some(3),
                timeout: Some(Duration::from_secs(20)),
                ..Default::default()
            },
        )
        .await?;

    for (i, slot) in results.iter().enumerate() {
        match slot {
            Ok(body) => {
                let response = HttpMessage::deserialize(body)?;
                let status = response
                    .json()
                    .and_then(|p| p.get("status_code"))
                    .cloned()
                    .unwrap_or_default();
                println!("slot {i}: HTTP {status}, {} bytes", body.len());
            }
            Err(err) => println!("slot {i}: error: {err}"),
        }
    }

    client.close().await;
    Ok(())
}
