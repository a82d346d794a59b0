//! Opening batches of connections to one node.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tarantool_core::Result;

use super::Connection;
use crate::config::NetworkConfig;

/// Opens the connections of one node's pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + std::fmt::Debug {
    /// Opens `count` connections to `address` in parallel.
    ///
    /// A batch either succeeds as a whole or fails; connections opened before
    /// a sibling failed are closed again.
    async fn connect(&self, address: SocketAddr, count: usize) -> Result<Vec<Arc<Connection>>>;
}

/// Factory opening plain TCP connections.
#[derive(Debug, Clone)]
pub struct TcpConnectionFactory {
    connect_timeout: Duration,
    request_timeout: Duration,
    tcp_nodelay: bool,
}

impl TcpConnectionFactory {
    /// Creates a factory using the network settings of a client configuration.
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            tcp_nodelay: config.tcp_nodelay(),
        }
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    #[tracing::instrument(name = "connection_factory.connect", skip(self), level = "debug")]
    async fn connect(&self, address: SocketAddr, count: usize) -> Result<Vec<Arc<Connection>>> {
        let attempts = (0..count).map(|_| {
            Connection::connect(
                address,
                self.connect_timeout,
                self.request_timeout,
                self.tcp_nodelay,
            )
        });

        let mut opened = Vec::with_capacity(count);
        let mut first_error = None;
        for result in join_all(attempts).await {
            match result {
                Ok(connection) => opened.push(connection),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(error) = first_error {
            join_all(opened.iter().map(|connection| connection.close())).await;
            return Err(error);
        }
        Ok(opened)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarantool_core::TarantoolError;
    use tokio::net::TcpListener;

    fn network(connect_timeout: Duration) -> NetworkConfig {
        NetworkConfig::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_opens_requested_number_of_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let acceptor = tokio::spawn(async move {
            let mut streams = Vec::new();
            for _ in 0..3 {
                streams.push(listener.accept().await.unwrap().0);
            }
            streams
        });

        let factory = TcpConnectionFactory::new(&network(Duration::from_secs(1)));
        let connections = factory.connect(address, 3).await.unwrap();
        let _streams = acceptor.await.unwrap();

        assert_eq!(connections.len(), 3);
        assert!(connections.iter().all(|c| c.is_alive() && c.address() == address));
    }

    #[tokio::test]
    async fn test_refused_connection_fails_batch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let factory = TcpConnectionFactory::new(&network(Duration::from_secs(1)));
        let result = factory.connect(address, 2).await;

        assert!(matches!(result, Err(TarantoolError::Connection(_))));
    }
}
