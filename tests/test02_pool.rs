#![cfg(feature = "test-utils")]

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use sqlfx::prelude::*;
use sqlfx::test_utils::MockConnector;

async fn client(connector: &MockConnector, pool: PoolConfig) -> Client {
    let config = ClientConfig::new(Dialect::Postgres).with_pool(pool);
    Client::new(Arc::new(connector.clone()), config)
        .await
        .expect("client should build")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_never_exceeds_max_size() {
    let connector = MockConnector::new();
    connector.with_delay(Duration::from_millis(10));
    let client = client(&connector, PoolConfig::new(0, 3)).await;

    let calls = (0..20).map(|i| {
        let client = client.clone();
        async move {
            client
                .execute(&sql!("SELECT {}", i).into(), None)
                .await
        }
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(connector.count_matching("SELECT"), 20);
    // The transaction pool is separate and was never touched.
    assert!(connector.peak() <= 3);
    assert_eq!(client.pool_status().max_size, 3);
    assert_eq!(client.pool_status().waiting, 0);
}

#[tokio::test]
async fn excess_acquirers_wait_for_a_release() {
    let connector = MockConnector::new();
    let client = client(&connector, PoolConfig::new(0, 1)).await;

    let held = client.reserve().await.unwrap();
    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.execute(&sql!("SELECT 1").into(), None).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());
    assert_eq!(client.pool_status().waiting, 1);

    held.release();
    waiter.await.unwrap().unwrap();
    assert_eq!(connector.created(), 1);
}

#[tokio::test]
async fn unhealthy_connections_are_replaced() {
    let connector = MockConnector::new();
    let client = client(&connector, PoolConfig::new(1, 1)).await;
    assert_eq!(connector.created(), 1);

    connector.set_unhealthy(true);
    let conn = client.reserve().await;
    connector.set_unhealthy(false);

    // The idle connection failed its health check and a fresh one was opened.
    assert!(conn.is_ok());
    assert_eq!(connector.created(), 2);
    assert_eq!(connector.open(), 1);
}

#[tokio::test]
async fn connector_failures_surface_on_acquire() {
    let connector = MockConnector::new();
    let client = client(&connector, PoolConfig::new(0, 2)).await;

    connector.refuse_connections(true);
    let err = client
        .execute(&sql!("SELECT 1").into(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SqlFxError::ConnectionError(_)));

    connector.refuse_connections(false);
    client.execute(&sql!("SELECT 1").into(), None).await.unwrap();
}

#[tokio::test]
async fn invalid_pool_bounds_are_config_errors() {
    let connector = MockConnector::new();
    let config = ClientConfig::new(Dialect::Sqlite).with_pool(PoolConfig::new(3, 1));
    let err = Client::new(Arc::new(connector.clone()), config)
        .await
        .unwrap_err();
    assert!(matches!(err, SqlFxError::ConfigError(_)));
    assert_eq!(connector.created(), 0);
}

#[tokio::test]
async fn closed_client_refuses_work() {
    let connector = MockConnector::new();
    let client = client(&connector, PoolConfig::new(0, 1)).await;
    client.close();
    assert!(client.is_closed());
    assert!(client.execute(&sql!("SELECT 1").into(), None).await.is_err());
    assert!(client.begin().await.is_err());
}
