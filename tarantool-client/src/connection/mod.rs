//! Connection management for the Tarantool client.

mod connection;
mod discovery;
mod factory;
mod manager;
mod strategy;
mod tracker;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::{Connection, ConnectionId, FailureListener};
pub use discovery::{AddressProvider, StaticAddressProvider};
pub use factory::{ConnectionFactory, TcpConnectionFactory};
pub use manager::{ConnectionEvent, ConnectionManager, ConnectionRegistry};
pub use strategy::{
    create_strategy, ConnectionSelectionStrategy, ParallelRoundRobinStrategy, RoundRobinStrategy,
};
pub use tracker::{RequestTracker, ResponseFuture, TrackerStats};
