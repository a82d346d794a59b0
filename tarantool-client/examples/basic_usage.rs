//! Basic usage example: connect to a cluster, ping it and call a function.
//!
//! Run with: `cargo run --example basic_usage`
//!
//! Requires Tarantool listening on localhost:3301 (override with
//! `TARANTOOL_ADDRESSES`). Set `RUST_LOG=tarantool_client=debug` to watch
//! the connect cycle.

use std::time::Duration;

use bytes::Bytes;
use tarantool_client::{ClientConfig, ClusterTarantoolClient, ConnectionEvent, TarantoolClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Tarantool Client Basic Usage Example ===\n");

    let config = if std::env::var("TARANTOOL_ADDRESSES").is_ok() {
        ClientConfig::from_env()?
    } else {
        ClientConfig::builder()
            .add_address("127.0.0.1:3301".parse()?)
            .connections_per_node(2)
            .connect_timeout(Duration::from_secs(2))
            .build()?
    };

    let client = ClusterTarantoolClient::new(config);
    let mut events = client.connection_manager().subscribe();

    println!("Connecting...");
    client.ping().await?;
    println!(
        "Connected with {} connection(s) to {:?}\n",
        client.connection_manager().connection_count(),
        client.connection_manager().connected_addresses()
    );

    while let Ok(event) = events.try_recv() {
        if let ConnectionEvent::Connected { id, address } = event {
            println!("  connection {} -> {}", id.value(), address);
        }
    }

    // 0x90 is an empty MessagePack array: no arguments.
    let info = client.call("box.info", Bytes::from_static(&[0x90])).await?;
    println!("\nbox.info returned {} bytes", info.len());

    let answer = client
        .eval("return 40 + 2", Bytes::from_static(&[0x90]))
        .await?;
    println!("eval returned {} bytes", answer.len());

    client.close().await;
    println!("\nClient closed.");
    Ok(())
}
