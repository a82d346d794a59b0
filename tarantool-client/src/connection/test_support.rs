//! In-memory connections for unit tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::DuplexStream;

use super::Connection;

/// Opens a connection backed by an in-memory pipe.
///
/// Dropping the returned peer end makes the connection fail.
pub(crate) fn duplex_connection(port: u16) -> (Arc<Connection>, DuplexStream) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    (Connection::spawn(client, address, Duration::from_secs(5)), server)
}

/// Opens `count` connections to the same port, keeping their peers alive.
pub(crate) fn duplex_pool(port: u16, count: usize) -> (Vec<Arc<Connection>>, Vec<DuplexStream>) {
    (0..count).map(|_| duplex_connection(port)).unzip()
}
