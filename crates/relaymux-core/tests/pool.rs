mod common;

use common::{Behavior, MockConnector};
use relaymux_core::{Connection, ConnectionState, PoolError};
use std::time::Duration;

#[tokio::test]
async fn test_ensure_reuses_open_connection() {
    let connector = MockConnector::new();
    let pool = common::pool(&connector);

    let first = pool.ensure_connection("wss://relay.example").await.unwrap();
    let second = pool.ensure_connection("wss://relay.example").await.unwrap();

    assert_eq!(connector.created(), 1);
    assert_eq!(first.state(), ConnectionState::Open);
    assert_eq!(second.endpoint().as_str(), "wss://relay.example/");
}

#[tokio::test]
async fn test_equivalent_addresses_share_a_slot() {
    let connector = MockConnector::new();
    let pool = common::pool(&connector);

    pool.ensure_connection("wss://relay.example/").await.unwrap();
    pool.ensure_connection("WSS://Relay.Example:443").await.unwrap();
    pool.ensure_connection("wss://relay.example//").await.unwrap();

    assert_eq!(connector.created(), 1);
    assert_eq!(pool.endpoints().len(), 1);
}

#[tokio::test]
async fn test_stale_connection_is_replaced() {
    let connector = MockConnector::new();
    let pool = common::pool(&connector);

    pool.ensure_connection("wss://relay.example").await.unwrap();
    connector
        .relay("wss://relay.example")
        .set_state(ConnectionState::Closing);

    let replacement = pool.ensure_connection("wss://relay.example").await.unwrap();

    assert_eq!(connector.created(), 2);
    assert_eq!(replacement.state(), ConnectionState::Open);
    assert_eq!(pool.stats().pooled, 1);
}

#[tokio::test]
async fn test_connect_failure_is_reported_and_retried() {
    let connector = MockConnector::new();
    connector.set("wss://down.example", Behavior::Fail);
    let pool = common::pool(&connector);

    let err = match pool.ensure_connection("wss://down.example").await {
        Err(e) => e,
        Ok(_) => panic!("connect should fail"),
    };
    assert!(matches!(err, PoolError::ConnectFailed { .. }));
    assert_eq!(err.endpoint().map(|e| e.as_str()), Some("wss://down.example/"));
    assert_eq!(pool.stats().stale, 1);

    connector.set("wss://down.example", Behavior::serve(Vec::new()));
    pool.ensure_connection("wss://down.example").await.unwrap();
    assert_eq!(connector.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_connect_watchdog_returns_pending_connection() {
    let connector = MockConnector::new();
    connector.set("wss://slow.example", Behavior::Hang);
    let pool = common::pool(&connector);

    let started = tokio::time::Instant::now();
    let connection = pool.ensure_connection("wss://slow.example").await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(connection.state(), ConnectionState::Connecting);

    // Still connecting, so it is reused rather than replaced.
    pool.ensure_connection("wss://slow.example").await.unwrap();
    assert_eq!(connector.created(), 1);
    assert_eq!(pool.stats().connecting, 1);
}

#[tokio::test]
async fn test_close_evicts_and_closes() {
    let connector = MockConnector::new();
    let pool = common::pool(&connector);

    pool.ensure_connection("wss://a.example").await.unwrap();
    pool.ensure_connection("wss://b.example").await.unwrap();

    pool.close(["wss://a.example:443/"]).unwrap();

    assert_eq!(
        connector.relay("wss://a.example").state(),
        ConnectionState::Closed
    );
    assert!(pool.connection("wss://a.example").unwrap().is_none());
    assert!(pool.connection("wss://b.example").unwrap().is_some());

    pool.close_all();
    assert!(pool.endpoints().is_empty());
    assert_eq!(
        connector.relay("wss://b.example").state(),
        ConnectionState::Closed
    );
}

#[tokio::test]
async fn test_close_with_invalid_address_closes_nothing() {
    let connector = MockConnector::new();
    let pool = common::pool(&connector);
    pool.ensure_connection("wss://a.example").await.unwrap();

    let result = pool.close(["wss://a.example", "not a url"]);

    assert!(matches!(result, Err(PoolError::InvalidAddress { .. })));
    assert_eq!(
        connector.relay("wss://a.example").state(),
        ConnectionState::Open
    );
}

#[tokio::test]
async fn test_stats() {
    let connector = MockConnector::new();
    connector.set("wss://down.example", Behavior::Fail);
    let pool = common::pool(&connector);

    pool.ensure_connection("wss://a.example").await.unwrap();
    let _ = pool.ensure_connection("wss://down.example").await;

    let stats = pool.stats();
    assert_eq!(stats.pooled, 2);
    assert_eq!(stats.open, 1);
    assert_eq!(stats.stale, 1);
    assert_eq!(stats.tracked_events, 0);
}
