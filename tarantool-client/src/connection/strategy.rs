//! Connection selection strategies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tarantool_core::{Result, TarantoolError};

use super::Connection;
use crate::config::SelectionStrategyKind;

/// Picks the connection that carries the next request.
///
/// A strategy is built over an immutable list of connections and is replaced
/// as a whole after every connect cycle. Connections that died since then
/// are skipped, never removed.
pub trait ConnectionSelectionStrategy: Send + Sync + std::fmt::Debug {
    /// Returns the next live connection.
    ///
    /// Fails with [`TarantoolError::NoAvailableConnections`] when every
    /// connection has died.
    fn next(&self) -> Result<Arc<Connection>>;

    /// Returns the number of connections this strategy selects from.
    fn len(&self) -> usize;

    /// Returns `true` if there is nothing to select from.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cycles through connections in order.
///
/// Each call advances a shared cursor and probes at most one full lap, so a
/// call never checks the same connection twice.
#[derive(Debug)]
pub struct RoundRobinStrategy {
    connections: Vec<Arc<Connection>>,
    cursor: AtomicUsize,
}

impl RoundRobinStrategy {
    /// Creates a strategy over the given connections.
    pub fn new(connections: Vec<Arc<Connection>>) -> Self {
        Self {
            connections,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl ConnectionSelectionStrategy for RoundRobinStrategy {
    fn next(&self) -> Result<Arc<Connection>> {
        let len = self.connections.len();
        for _ in 0..len {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            let connection = &self.connections[idx];
            if connection.is_alive() {
                return Ok(Arc::clone(connection));
            }
        }
        Err(TarantoolError::NoAvailableConnections)
    }

    fn len(&self) -> usize {
        self.connections.len()
    }
}

/// Round robin over nodes, then round robin within the chosen node's pool.
///
/// Consecutive requests land on different nodes, spreading load evenly across
/// the cluster even when pools are large.
#[derive(Debug)]
pub struct ParallelRoundRobinStrategy {
    groups: Vec<RoundRobinStrategy>,
    cursor: AtomicUsize,
}

impl ParallelRoundRobinStrategy {
    /// Creates a strategy over per-node connection groups.
    ///
    /// Empty groups are ignored.
    pub fn new(groups: Vec<Vec<Arc<Connection>>>) -> Self {
        Self {
            groups: groups
                .into_iter()
                .filter(|group| !group.is_empty())
                .map(RoundRobinStrategy::new)
                .collect(),
            cursor: AtomicUsize::new(0),
        }
    }
}

impl ConnectionSelectionStrategy for ParallelRoundRobinStrategy {
    fn next(&self) -> Result<Arc<Connection>> {
        let len = self.groups.len();
        for _ in 0..len {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            if let Ok(connection) = self.groups[idx].next() {
                return Ok(connection);
            }
        }
        Err(TarantoolError::NoAvailableConnections)
    }

    fn len(&self) -> usize {
        self.groups.iter().map(RoundRobinStrategy::len).sum()
    }
}

/// Builds the strategy of the given kind over per-node connection groups.
pub fn create_strategy(
    kind: SelectionStrategyKind,
    groups: Vec<Vec<Arc<Connection>>>,
) -> Arc<dyn ConnectionSelectionStrategy> {
    match kind {
        SelectionStrategyKind::RoundRobin => {
            Arc::new(RoundRobinStrategy::new(groups.into_iter().flatten().collect()))
        }
        SelectionStrategyKind::ParallelRoundRobin => Arc::new(ParallelRoundRobinStrategy::new(groups)),
    }
}
