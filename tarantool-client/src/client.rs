//! Tarantool client entry points.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tarantool_core::{Packet, Result};
use tracing::instrument;

use crate::config::ClientConfig;
use crate::connection::{AddressProvider, Connection, ConnectionManager};

/// Operations every client layer supports.
///
/// The cluster client implements them over pooled connections; decorators
/// such as [`RetryingTarantoolClient`](crate::RetryingTarantoolClient) wrap
/// another implementation and add exactly one concern.
#[async_trait]
pub trait TarantoolClient: Send + Sync {
    /// Sends a raw request and returns the successful response.
    ///
    /// Error responses are converted into [`TarantoolError::Server`](tarantool_core::TarantoolError::Server).
    async fn execute(&self, request: Packet) -> Result<Packet>;

    /// Checks that a node answers.
    async fn ping(&self) -> Result<()> {
        self.execute(Packet::ping()).await.map(|_| ())
    }

    /// Calls a stored function with already-encoded arguments.
    async fn call(&self, function: &str, args: Bytes) -> Result<Bytes> {
        self.execute(Packet::call(function, args))
            .await
            .map(Packet::into_body)
    }

    /// Evaluates an expression with already-encoded arguments.
    async fn eval(&self, expression: &str, args: Bytes) -> Result<Bytes> {
        self.execute(Packet::eval(expression, args))
            .await
            .map(Packet::into_body)
    }

    /// Closes the client; later requests fail with
    /// [`TarantoolError::ClientClosed`](tarantool_core::TarantoolError::ClientClosed).
    async fn close(&self);
}

/// Client sending requests over pooled connections to a set of nodes.
///
/// # Example
///
/// ```ignore
/// use tarantool_client::{ClientConfig, ClusterTarantoolClient, TarantoolClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::builder()
///         .add_address("127.0.0.1:3301".parse()?)
///         .connections_per_node(4)
///         .build()?;
///
///     let client = ClusterTarantoolClient::connect(config).await?;
///     client.ping().await?;
///     client.close().await;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ClusterTarantoolClient {
    config: Arc<ClientConfig>,
    manager: Arc<ConnectionManager>,
}

impl ClusterTarantoolClient {
    /// Creates a client that connects lazily, on its first request.
    pub fn new(config: ClientConfig) -> Self {
        let manager = ConnectionManager::from_config(config.clone());
        Self {
            config: Arc::new(config),
            manager: Arc::new(manager),
        }
    }

    /// Creates a client and runs its first connect cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if no configured node can be reached.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let client = Self::new(config);
        client.manager.connect().await?;

        tracing::info!(
            connections = client.manager.connection_count(),
            "connected to Tarantool"
        );
        Ok(client)
    }

    /// Creates a lazily connecting client discovering nodes through `provider`.
    pub fn with_provider(config: ClientConfig, provider: impl AddressProvider + 'static) -> Self {
        let manager = ConnectionManager::new(config.clone(), provider);
        Self {
            config: Arc::new(config),
            manager: Arc::new(manager),
        }
    }

    /// Creates a client over an existing connection manager.
    pub fn with_manager(manager: Arc<ConnectionManager>) -> Self {
        Self {
            config: Arc::new(manager.config().clone()),
            manager,
        }
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the connection manager.
    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Returns a connection chosen by the selection strategy.
    pub async fn get_connection(&self) -> Result<Arc<Connection>> {
        self.manager.get_connection().await
    }

    /// Sends a request and decodes its response.
    ///
    /// `timeout` overrides the configured request timeout for this request.
    #[instrument(
        name = "client.send_request",
        skip(self, request, decoder),
        fields(code = request.code()),
        level = "trace"
    )]
    pub async fn send_request<T, D>(&self, request: Packet, decoder: D, timeout: Option<Duration>) -> Result<T>
    where
        T: Send + 'static,
        D: FnOnce(Packet) -> Result<T> + Send + Sync + 'static,
    {
        let connection = self.manager.get_connection().await?;
        connection.send_request(request, decoder, timeout).await
    }
}

#[async_trait]
impl TarantoolClient for ClusterTarantoolClient {
    async fn execute(&self, request: Packet) -> Result<Packet> {
        self.send_request(request, Packet::into_result, None).await
    }

    async fn close(&self) {
        self.manager.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tarantool_core::TarantoolError;

    fn unreachable_config() -> ClientConfig {
        ClientConfig::builder()
            .add_address(SocketAddr::from(([127, 0, 0, 1], 1)))
            .connect_timeout(Duration::from_millis(200))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_does_not_connect() {
        let client = ClusterTarantoolClient::new(unreachable_config());
        assert_eq!(client.connection_manager().cycle_count(), 0);
        assert_eq!(client.config().network().addresses().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_fails_without_reachable_node() {
        let result = ClusterTarantoolClient::connect(unreachable_config()).await;
        assert!(matches!(result, Err(TarantoolError::Connection(_))));
    }

    #[tokio::test]
    async fn test_closed_client_rejects_requests() {
        let client = ClusterTarantoolClient::new(unreachable_config());
        client.close().await;

        assert!(matches!(client.ping().await, Err(TarantoolError::ClientClosed)));
    }

    #[test]
    fn test_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClusterTarantoolClient>();
        assert_send_sync::<ConnectionManager>();
        assert_send_sync::<Connection>();
        assert_send_sync::<crate::connection::RequestTracker>();
    }

    #[tokio::test]
    async fn test_client_is_shared_across_tasks() {
        let client = Arc::new(ClusterTarantoolClient::new(unreachable_config()));
        client.close().await;

        let tasks = (0..4).map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.ping().await })
        });
        for result in futures::future::join_all(tasks).await {
            assert!(matches!(result.unwrap(), Err(TarantoolError::ClientClosed)));
        }
    }
}
