//! Concurrency patterns without any network: bounded fan-out and
//! retry-with-timeout over simulated work.
//!
//! Run: `cargo run --example bounded_fanout`

use std::time::Duration;

use pynector::{parallel_requests, retry_with_timeout, PynectorError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Twenty jobs, at most three in flight; results come back in input
    // order regardless of completion order.
    let jobs: Vec<u64> = (1..=20).collect();
    let results = parallel_requests(
        jobs,
        |n| async move {
            tokio::time::sleep(Duration::from_millis(25 + (n * 7) % 40)).await;
            Ok(n * n)
        },
        Some(3),
    )
    .await?;
    println!("squares: {results:?}");

    // Each attempt gets 50ms; the first two run long and get cut off.
    let mut attempt = 0u32;
    let value = retry_with_timeout(
        || {
            attempt += 1;
            let slow = attempt < 3;
            async move {
                if slow {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, PynectorError>("third time lucky")
            }
        },
        3,
        Duration::from_millis(50),
    )
    .await?;
    println!("{value} after {attempt} attempts");

    Ok(())
}
