//! Request timeouts against a slow server.

mod common;

use std::time::{Duration, Instant};

use bytes::Bytes;
use common::{config_for, sleep_args, MockServer};
use tarantool_client::{ClusterTarantoolClient, Packet, TarantoolClient, TarantoolError};

#[tokio::test]
async fn test_late_response_after_timeout_is_discarded() {
    let server = MockServer::start().await;
    let client = ClusterTarantoolClient::connect(config_for(&[&server], 1))
        .await
        .unwrap();
    let connection = client.get_connection().await.unwrap();

    let started = Instant::now();
    let result = client
        .send_request(
            Packet::call("sleep", sleep_args(Duration::from_millis(100))),
            Packet::into_result,
            Some(Duration::from_millis(50)),
        )
        .await;
    let observed = started.elapsed();

    match result {
        Err(TarantoolError::RequestTimeout { elapsed, .. }) => {
            assert!(elapsed >= Duration::from_millis(50));
        }
        other => panic!("expected request timeout, got {:?}", other),
    }
    assert!(observed < Duration::from_millis(100), "timed out late: {:?}", observed);

    // Let the late response arrive.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(connection.is_alive());
    assert_eq!(connection.in_flight(), 0);
    let stats = connection.tracker_stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.completed, 0);

    client.ping().await.unwrap();
    assert_eq!(connection.tracker_stats().completed, 1);
    client.close().await;
}

#[tokio::test]
async fn test_unanswered_request_uses_configured_timeout() {
    let server = MockServer::start().await;
    let config = tarantool_client::ClientConfig::builder()
        .add_address(server.address())
        .request_timeout(Duration::from_millis(80))
        .build()
        .unwrap();
    let client = ClusterTarantoolClient::connect(config).await.unwrap();

    let error = client.call("silent", Bytes::new()).await.unwrap_err();
    assert!(matches!(error, TarantoolError::RequestTimeout { .. }));
    assert!(error.is_network_error());

    client.close().await;
}

#[tokio::test]
async fn test_connection_loss_fails_pending_requests() {
    let server = MockServer::start().await;
    let client = ClusterTarantoolClient::connect(config_for(&[&server], 1))
        .await
        .unwrap();
    server.wait_accepted(1).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.call("silent", Bytes::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    server.kill_connections();

    let error = pending.await.unwrap().unwrap_err();
    assert!(
        matches!(error, TarantoolError::ConnectionLost(_)),
        "unexpected error: {:?}",
        error
    );

    client.close().await;
}
