//! Async Rust client runtime for [Tarantool](https://www.tarantool.io/) clusters.
//!
//! This crate keeps a pool of multiplexed connections to a set of Tarantool
//! nodes, spreads requests across them, transparently reconnects after node
//! loss, and optionally retries failed operations. It is built on
//! [Tokio](https://tokio.rs/) and exposes every operation as an `async fn`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use tarantool_client::{ClientConfig, ClusterTarantoolClient, TarantoolClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .add_address("127.0.0.1:3301".parse()?)
//!         .connections_per_node(4)
//!         .build()?;
//!     let client = ClusterTarantoolClient::connect(config).await?;
//!
//!     client.ping().await?;
//!     let reply = client.call("box.info", Bytes::new()).await?;
//!     println!("{} bytes", reply.len());
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! | Layer | Type | Responsibility |
//! |-------|------|----------------|
//! | Transport | [`Connection`] | One socket, sync-id multiplexing, failure listeners |
//! | Correlation | [`RequestTracker`] | Pending requests keyed by sync id, per-request timeouts |
//! | Pooling | [`ConnectionManager`] | Registry of pools per node, single-flight reconnect |
//! | Selection | [`ConnectionSelectionStrategy`] | Round-robin over connections or over nodes |
//! | Retry | [`RetryPolicy`] | Attempts-bound or deadline-bound retries with backoff |
//! | Facade | [`TarantoolClient`] | `execute`, `ping`, `call`, `eval`, `close` |
//!
//! # Retrying
//!
//! Wrap any client in a [`RetryingTarantoolClient`] to retry its operations:
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tarantool_client::{ClientConfig, ClusterTarantoolClient, RetryingTarantoolClient};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::builder()
//!     .retry(|r| r.infinite(Duration::from_secs(10)).delay(Duration::from_millis(50)))
//!     .build()?;
//! let retrying = RetryingTarantoolClient::from_config(ClusterTarantoolClient::new(config.clone()), &config)?;
//! # let _ = retrying;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Files
//!
//! With the `config-file` feature, configuration can be loaded from YAML or
//! TOML; [`ClientConfig::from_env`] reads `TARANTOOL_*` variables without any
//! feature flag.

#![warn(missing_docs)]

mod client;
pub mod config;
pub mod config_file;
pub mod connection;
pub mod retry;
mod retrying;
pub mod runtime;

pub use client::{ClusterTarantoolClient, TarantoolClient};
pub use config::{
    ClientConfig, ClientConfigBuilder, ConfigError, NetworkConfig, NetworkConfigBuilder,
    RetryConfig, RetryConfigBuilder, RetryKind, RetryOn, SelectionStrategyKind,
};
#[cfg(feature = "config-file")]
pub use config_file::load_config;
pub use config_file::{FileConfig, FileNetworkConfig, FileRetryConfig};
pub use connection::{
    AddressProvider, Connection, ConnectionEvent, ConnectionFactory, ConnectionId,
    ConnectionManager, ConnectionRegistry, ConnectionSelectionStrategy, RequestTracker,
    ResponseFuture, StaticAddressProvider, TcpConnectionFactory,
};
pub use retry::{
    AttemptsBoundRetryPolicy, AttemptsBoundRetryPolicyFactory, Backoff, ErrorClassifier,
    InfiniteRetryPolicy, InfiniteRetryPolicyFactory, OperationHandle, RetryDecision, RetryPolicy,
    RetryPolicyFactory,
};
pub use retrying::RetryingTarantoolClient;
pub use runtime::{HandleRuntime, Runtime, TokioRuntime};
pub use tarantool_core as core;
pub use tarantool_core::{Packet, Result, TarantoolError};
