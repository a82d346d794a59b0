//! Retrying client example: survive node restarts with an unbounded policy.
//!
//! Run with: `cargo run --example retrying_client`
//!
//! Requires Tarantool listening on localhost:3301. Restart the server while
//! the example runs; requests keep succeeding once it is back, as long as the
//! outage is shorter than the operation timeout.

use std::time::Duration;

use tarantool_client::{
    ClientConfig, ClusterTarantoolClient, RetryingTarantoolClient, TarantoolClient,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tarantool_client=info")),
        )
        .init();

    let config = ClientConfig::builder()
        .add_address("127.0.0.1:3301".parse()?)
        .connect_timeout(Duration::from_millis(500))
        .retry(|r| {
            r.infinite(Duration::from_secs(30))
                .request_timeout(Duration::from_secs(1))
                .delay(Duration::from_millis(100))
                .max_delay(Duration::from_secs(2))
                .multiplier(2.0)
                .jitter(0.2)
        })
        .build()?;

    let client = RetryingTarantoolClient::from_config(
        ClusterTarantoolClient::new(config.clone()),
        &config,
    )?;

    for round in 1..=20 {
        match client.ping().await {
            Ok(()) => println!("ping {round}: ok"),
            Err(e) => println!("ping {round}: gave up: {e}"),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    client.close().await;
    Ok(())
}
