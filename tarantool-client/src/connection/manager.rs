//! Connection registry and reconnect coordination.
//!
//! The manager owns one pool of connections per node and hands out
//! connections through the configured selection strategy. When any pooled
//! connection fails, the manager switches into reconnect mode. The next caller
//! of [`ConnectionManager::get_connection`] drives a connect cycle while every
//! concurrent caller waits for that same cycle to finish. There is never more
//! than one cycle in progress.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use tarantool_core::{Result, TarantoolError};
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tracing::{instrument, Span};

use super::connection::{Connection, ConnectionId};
use super::discovery::{AddressProvider, StaticAddressProvider};
use super::factory::{ConnectionFactory, TcpConnectionFactory};
use super::strategy::{create_strategy, ConnectionSelectionStrategy};
use crate::config::ClientConfig;

/// Events emitted during connection lifecycle.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A connection to a node was opened.
    Connected {
        /// The connection identifier.
        id: ConnectionId,
        /// The address of the node.
        address: SocketAddr,
    },
    /// A connection to a node was lost or closed.
    Disconnected {
        /// The connection identifier.
        id: ConnectionId,
        /// The address of the node.
        address: SocketAddr,
        /// The error that caused disconnection, `None` for a deliberate close.
        error: Option<String>,
    },
    /// A connect cycle started.
    CycleStarted {
        /// Sequence number of the cycle, starting at 1.
        generation: u64,
    },
    /// A connect cycle installed a new connection registry.
    CycleCompleted {
        /// Sequence number of the cycle.
        generation: u64,
        /// Number of connections in the new registry.
        connections: usize,
    },
    /// A connect cycle failed; the previous registry stays in place.
    CycleFailed {
        /// Sequence number of the cycle.
        generation: u64,
        /// Description of the failure.
        error: String,
    },
}

/// Connections grouped by node, in the order the address provider listed them.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    nodes: Vec<(SocketAddr, Vec<Arc<Connection>>)>,
}

impl ConnectionRegistry {
    /// Returns the pool of the given node.
    pub fn get(&self, address: &SocketAddr) -> Option<&[Arc<Connection>]> {
        self.nodes
            .iter()
            .find(|(node, _)| node == address)
            .map(|(_, pool)| pool.as_slice())
    }

    /// Returns the node addresses in registry order.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.nodes.iter().map(|(address, _)| *address).collect()
    }

    /// Iterates over every connection of every node.
    pub fn connections(&self) -> impl Iterator<Item = &Arc<Connection>> {
        self.nodes.iter().flat_map(|(_, pool)| pool.iter())
    }

    /// Returns the total number of connections.
    pub fn len(&self) -> usize {
        self.nodes.iter().map(|(_, pool)| pool.len()).sum()
    }

    /// Returns `true` if the registry holds no connection.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pools(&self) -> Vec<Vec<Arc<Connection>>> {
        self.nodes.iter().map(|(_, pool)| pool.clone()).collect()
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    registry: ConnectionRegistry,
    strategy: Option<Arc<dyn ConnectionSelectionStrategy>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CycleOutcome {
    Idle,
    Completed,
    Failed(String),
}

/// Manages node connections and reconnects them on failure.
#[derive(Debug)]
pub struct ConnectionManager {
    config: Arc<ClientConfig>,
    provider: Arc<dyn AddressProvider>,
    factory: Arc<dyn ConnectionFactory>,
    state: RwLock<Arc<Snapshot>>,
    needs_reconnect: Arc<AtomicBool>,
    connecting: AtomicBool,
    closed: AtomicBool,
    cycles: AtomicU64,
    cycle_sender: watch::Sender<CycleOutcome>,
    event_sender: broadcast::Sender<ConnectionEvent>,
}

/// Resets the in-progress flag if a driving caller is cancelled mid-cycle.
struct CycleGuard<'a> {
    manager: &'a ConnectionManager,
    armed: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("connect cycle cancelled before completion");
            self.manager
                .finish_cycle(CycleOutcome::Failed("connect cycle was cancelled".to_string()));
        }
    }
}

impl ConnectionManager {
    /// Creates a manager with the given address provider and TCP connections.
    pub fn new(config: ClientConfig, provider: impl AddressProvider + 'static) -> Self {
        let factory = TcpConnectionFactory::new(config.network());
        Self::with_factory(Arc::new(config), Arc::new(provider), Arc::new(factory))
    }

    /// Creates a manager connecting to the addresses listed in the configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        let provider = StaticAddressProvider::new(config.network().addresses().to_vec());
        Self::new(config, provider)
    }

    /// Creates a manager with custom address discovery and connection factory.
    pub fn with_factory(
        config: Arc<ClientConfig>,
        provider: Arc<dyn AddressProvider>,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        let (event_sender, _) = broadcast::channel(64);
        let (cycle_sender, _) = watch::channel(CycleOutcome::Idle);

        Self {
            config,
            provider,
            factory,
            state: RwLock::new(Arc::new(Snapshot::default())),
            needs_reconnect: Arc::new(AtomicBool::new(true)),
            connecting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            cycle_sender,
            event_sender,
        }
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Subscribes to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_sender.subscribe()
    }

    /// Returns a connection for the next request.
    ///
    /// In stable mode this is a single strategy call. In reconnect mode the
    /// first caller drives a connect cycle and every other caller waits for
    /// its outcome, bounded by twice the connect timeout. A failed cycle fails
    /// every caller that waited on it.
    #[instrument(name = "connection_manager.get_connection", skip(self), level = "trace")]
    pub async fn get_connection(&self) -> Result<Arc<Connection>> {
        loop {
            if self.is_closed() {
                return Err(TarantoolError::ClientClosed);
            }

            if !self.needs_reconnect.load(Ordering::Acquire) {
                return self.select();
            }

            let mut cycle = self.cycle_sender.subscribe();
            if !self.needs_reconnect.load(Ordering::Acquire) {
                continue;
            }

            if self
                .connecting
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return self.drive_cycle().await;
            }

            let wait = self.cycle_timeout();
            match timeout(wait, cycle.changed()).await {
                Err(_) => {
                    return Err(TarantoolError::Connection(format!(
                        "timed out after {:?} waiting for reconnect",
                        wait
                    )));
                }
                Ok(Err(_)) => return Err(TarantoolError::ClientClosed),
                Ok(Ok(())) => {}
            }

            let outcome = cycle.borrow_and_update().clone();
            match outcome {
                CycleOutcome::Completed => {
                    if self.is_closed() {
                        return Err(TarantoolError::ClientClosed);
                    }
                    return self.select();
                }
                CycleOutcome::Failed(message) => return Err(TarantoolError::Connection(message)),
                CycleOutcome::Idle => continue,
            }
        }
    }

    /// Eagerly runs the first connect cycle.
    pub async fn connect(&self) -> Result<()> {
        self.get_connection().await.map(|_| ())
    }

    /// Closes every connection and rejects further requests.
    ///
    /// Waits for an in-progress connect cycle first, then for the in-flight
    /// requests of every connection. Calling `close` again is a no-op.
    #[instrument(name = "connection_manager.close", skip(self))]
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut cycle = self.cycle_sender.subscribe();
        while self.connecting.load(Ordering::Acquire) {
            match timeout(self.cycle_timeout(), cycle.changed()).await {
                Ok(Ok(())) => {}
                _ => break,
            }
        }

        let snapshot = std::mem::take(&mut *self.state.write().unwrap_or_else(PoisonError::into_inner));
        let connections: Vec<Arc<Connection>> = snapshot.registry.connections().cloned().collect();
        tracing::debug!(connection_count = connections.len(), "closing all connections");

        join_all(connections.iter().map(|connection| connection.close())).await;
        for connection in &connections {
            let _ = self.event_sender.send(ConnectionEvent::Disconnected {
                id: connection.id(),
                address: connection.address(),
                error: None,
            });
        }

        tracing::info!("connection manager closed");
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns `true` while the next request will trigger a connect cycle.
    pub fn needs_reconnect(&self) -> bool {
        self.needs_reconnect.load(Ordering::Acquire)
    }

    /// Returns `true` while a connect cycle is in progress.
    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::Acquire)
    }

    /// Returns the number of connect cycles started so far.
    pub fn cycle_count(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Returns a copy of the current connection registry.
    pub fn registry(&self) -> ConnectionRegistry {
        self.snapshot().registry.clone()
    }

    /// Returns the number of live connections.
    pub fn connection_count(&self) -> usize {
        self.snapshot()
            .registry
            .connections()
            .filter(|connection| connection.is_alive())
            .count()
    }

    /// Returns the addresses of nodes with at least one live connection.
    pub fn connected_addresses(&self) -> Vec<SocketAddr> {
        let snapshot = self.snapshot();
        snapshot
            .registry
            .nodes
            .iter()
            .filter(|(_, pool)| pool.iter().any(|connection| connection.is_alive()))
            .map(|(address, _)| *address)
            .collect()
    }

    /// Returns the number of requests in flight across all connections.
    pub fn in_flight(&self) -> usize {
        self.snapshot()
            .registry
            .connections()
            .map(|connection| connection.in_flight())
            .sum()
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn select(&self) -> Result<Arc<Connection>> {
        match &self.snapshot().strategy {
            Some(strategy) => strategy.next(),
            None => Err(TarantoolError::NoAvailableConnections),
        }
    }

    fn cycle_timeout(&self) -> Duration {
        self.config.network().connect_timeout() * 2
    }

    fn finish_cycle(&self, outcome: CycleOutcome) {
        self.connecting.store(false, Ordering::Release);
        self.cycle_sender.send_replace(outcome);
    }

    async fn drive_cycle(&self) -> Result<Arc<Connection>> {
        let mut guard = CycleGuard {
            manager: self,
            armed: true,
        };

        if self.is_closed() {
            guard.armed = false;
            self.finish_cycle(CycleOutcome::Failed("client is closed".to_string()));
            return Err(TarantoolError::ClientClosed);
        }

        let generation = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.event_sender.send(ConnectionEvent::CycleStarted { generation });

        let limit = self.cycle_timeout();
        let result = match timeout(limit, self.run_cycle(generation)).await {
            Ok(result) => result,
            Err(_) => Err(TarantoolError::Connection(format!(
                "connect cycle timed out after {:?}",
                limit
            ))),
        };
        guard.armed = false;

        match result {
            Ok(snapshot) => {
                let connections = snapshot.registry.len();
                *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);

                self.needs_reconnect.store(false, Ordering::Release);
                // Failures between building the registry and clearing the flag had no listener effect.
                if self
                    .snapshot()
                    .registry
                    .connections()
                    .any(|connection| !connection.is_alive())
                {
                    self.needs_reconnect.store(true, Ordering::Release);
                }

                self.finish_cycle(CycleOutcome::Completed);
                let _ = self.event_sender.send(ConnectionEvent::CycleCompleted {
                    generation,
                    connections,
                });
                tracing::info!(generation, connections, "connect cycle completed");

                if self.is_closed() {
                    return Err(TarantoolError::ClientClosed);
                }
                self.select()
            }
            Err(error) => {
                self.finish_cycle(CycleOutcome::Failed(error.to_string()));
                let _ = self.event_sender.send(ConnectionEvent::CycleFailed {
                    generation,
                    error: error.to_string(),
                });
                tracing::error!(generation, error = %error, "connect cycle failed");
                Err(error)
            }
        }
    }

    #[instrument(
        name = "connection_manager.connect_cycle",
        skip(self),
        fields(addresses = tracing::field::Empty, connections = tracing::field::Empty),
        level = "debug"
    )]
    async fn run_cycle(&self, generation: u64) -> Result<Snapshot> {
        let mut addresses = self.provider.get_addresses().await?;
        let mut seen = std::collections::HashSet::new();
        addresses.retain(|address| seen.insert(*address));
        Span::current().record("addresses", addresses.len());

        if addresses.is_empty() {
            return Err(TarantoolError::Connection(
                "no node addresses available".to_string(),
            ));
        }

        let previous = self.snapshot();
        let pool_size = self.config.network().connections_per_node();

        let pools = join_all(addresses.iter().map(|address| {
            let existing = previous
                .registry
                .get(address)
                .map(<[Arc<Connection>]>::to_vec)
                .unwrap_or_default();
            self.refresh_node(*address, existing, pool_size)
        }))
        .await;

        for (address, pool) in &previous.registry.nodes {
            if !addresses.contains(address) {
                tracing::info!(address = %address, "node removed, closing its connections");
                retire(pool.clone());
            }
        }

        let registry = ConnectionRegistry {
            nodes: addresses
                .into_iter()
                .zip(pools)
                .filter(|(_, pool)| !pool.is_empty())
                .collect(),
        };
        Span::current().record("connections", registry.len());

        if registry.is_empty() {
            return Err(TarantoolError::Connection(
                "failed to connect to any node".to_string(),
            ));
        }

        let strategy = create_strategy(self.config.network().selection_strategy(), registry.pools());
        Ok(Snapshot {
            registry,
            strategy: Some(strategy),
        })
    }

    async fn refresh_node(
        &self,
        address: SocketAddr,
        existing: Vec<Arc<Connection>>,
        pool_size: usize,
    ) -> Vec<Arc<Connection>> {
        let live: Vec<Arc<Connection>> = existing
            .into_iter()
            .filter(|connection| connection.is_alive())
            .collect();
        if live.len() == pool_size {
            return live;
        }

        tracing::debug!(address = %address, live = live.len(), pool_size, "opening connections");
        match self.factory.connect(address, pool_size).await {
            Ok(fresh) => {
                for connection in &fresh {
                    self.watch(connection);
                    let _ = self.event_sender.send(ConnectionEvent::Connected {
                        id: connection.id(),
                        address,
                    });
                }
                retire(live);
                fresh
            }
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "failed to connect to node");
                live
            }
        }
    }

    fn watch(&self, connection: &Connection) {
        let needs_reconnect = Arc::clone(&self.needs_reconnect);
        let events = self.event_sender.clone();
        connection.add_failure_listener(Box::new(move |connection, error| {
            needs_reconnect.store(true, Ordering::Release);
            let _ = events.send(ConnectionEvent::Disconnected {
                id: connection.id(),
                address: connection.address(),
                error: Some(error.to_string()),
            });
        }));
    }
}

/// Closes replaced connections in the background once their requests drain.
fn retire(connections: Vec<Arc<Connection>>) {
    for connection in connections {
        if connection.is_alive() {
            tokio::spawn(async move { connection.close().await });
        }
    }
}
