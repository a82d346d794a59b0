//! Reconnect behavior after node loss.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{config_for, MockServer};
use tarantool_client::{ConnectionEvent, ConnectionManager};
use tokio::time::timeout;

async fn wait_for_live_connections(manager: &ConnectionManager, expected: usize) {
    timeout(Duration::from_secs(2), async {
        while manager.connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection loss was never observed");
    assert!(manager.needs_reconnect());
}

async fn three_nodes() -> (MockServer, MockServer, MockServer, Arc<ConnectionManager>) {
    let a = MockServer::start().await;
    let b = MockServer::start().await;
    let c = MockServer::start().await;
    let manager = Arc::new(ConnectionManager::from_config(config_for(&[&a, &b, &c], 2)));
    manager.connect().await.unwrap();
    assert_eq!(manager.connection_count(), 6);
    for server in [&a, &b, &c] {
        server.wait_accepted(2).await;
    }
    (a, b, c, manager)
}

#[tokio::test]
async fn test_killed_connections_are_reestablished() {
    let (a, b, c, manager) = three_nodes().await;
    assert_eq!(manager.cycle_count(), 1);

    a.kill_connections();
    wait_for_live_connections(&manager, 4).await;

    let callers = (0..20).map(|_| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.get_connection().await })
    });
    for result in futures::future::join_all(callers).await {
        assert!(result.unwrap().unwrap().is_alive());
    }

    assert_eq!(manager.cycle_count(), 2);
    assert!(!manager.needs_reconnect());
    assert_eq!(manager.connection_count(), 6);
    // Only the lost node was dialed again.
    a.wait_accepted(4).await;
    assert_eq!(a.accepted(), 4);
    assert_eq!(b.accepted(), 2);
    assert_eq!(c.accepted(), 2);

    manager.close().await;
}

#[tokio::test]
async fn test_lost_node_is_excluded() {
    let (a, b, c, manager) = three_nodes().await;

    a.shutdown();
    wait_for_live_connections(&manager, 4).await;

    let mut seen = HashSet::new();
    for _ in 0..60 {
        let connection = manager.get_connection().await.unwrap();
        assert!(connection.is_alive());
        assert_ne!(connection.address(), a.address());
        seen.insert(connection.id());
    }

    assert_eq!(manager.cycle_count(), 2);
    assert_eq!(seen.len(), 4);
    let addresses: HashSet<_> = manager.connected_addresses().into_iter().collect();
    assert_eq!(addresses, HashSet::from([b.address(), c.address()]));

    manager.close().await;
}

#[tokio::test]
async fn test_loss_and_recovery_events() {
    let (a, _b, _c, manager) = three_nodes().await;
    let mut events = manager.subscribe();

    a.kill_connections();
    wait_for_live_connections(&manager, 4).await;
    manager.get_connection().await.unwrap();

    let mut disconnected = 0;
    let mut connected = 0;
    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            ConnectionEvent::Disconnected { address, error, .. } => {
                assert_eq!(address, a.address());
                assert!(error.is_some());
                disconnected += 1;
            }
            ConnectionEvent::Connected { address, .. } => {
                assert_eq!(address, a.address());
                connected += 1;
            }
            ConnectionEvent::CycleCompleted { generation, connections } => {
                assert_eq!(generation, 2);
                assert_eq!(connections, 6);
                completed = true;
            }
            _ => {}
        }
    }

    assert_eq!(disconnected, 2);
    assert_eq!(connected, 2);
    assert!(completed);

    manager.close().await;
}
