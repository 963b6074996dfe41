//! Pool bound, queueing, isolation and eviction tests.

use querymux::prelude::*;
use querymux::testing::MockConnector;
use std::sync::Arc;
use std::time::Duration;

fn options(max_size: usize) -> PoolOptions {
    PoolOptions {
        max_size,
        min_idle: 0,
        idle_period: None,
        test_on_borrow: true,
    }
}

fn key(tenant: &str) -> PoolKey {
    PoolKey::new(Some(tenant), SourceKind::HttpApi)
}

// ==================== Bound and Queueing Tests ====================

#[tokio::test]
async fn test_open_handles_never_exceed_bound() {
    let mock = Arc::new(
        MockConnector::new(SourceKind::HttpApi)
            .with_run_delay(Duration::from_millis(30)),
    );
    let manager = Arc::new(PoolManager::new(options(2)));

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let manager = Arc::clone(&manager);
        let mock = Arc::clone(&mock);
        tasks.push(tokio::spawn(async move {
            let mut guard = manager
                .acquire(&key("acme"), mock as Arc<dyn Connector>, Duration::from_secs(5))
                .await
                .expect("acquire within generous timeout");
            let outcome = guard.run("q", &Params::new()).await;
            guard.release().await;
            outcome
        }));
    }
    for task in tasks {
        assert!(task.await.expect("task").is_ok());
    }

    assert_eq!(mock.peak_open(), 2);
    assert_eq!(mock.peak_in_flight(), 2);
    assert_eq!(mock.runs(), 6);
}

#[tokio::test]
async fn test_exhausted_pool_times_out_with_capacity_error() {
    let mock = Arc::new(MockConnector::new(SourceKind::HttpApi));
    let manager = Arc::new(PoolManager::new(options(1)));
    let connector: Arc<dyn Connector> = mock;

    let held = manager
        .acquire(&key("acme"), Arc::clone(&connector), Duration::from_millis(50))
        .await
        .expect("first acquire");

    let denied = manager
        .acquire(&key("acme"), Arc::clone(&connector), Duration::from_millis(50))
        .await;
    match denied {
        Err(Error::Capacity { .. }) => {}
        other => panic!("expected capacity error, got {other:?}"),
    }

    let stats = manager.stats(&key("acme")).await.expect("stats");
    assert_eq!(stats.exhausted_count, 1);

    // Once the slot frees, a fresh acquire succeeds.
    held.release().await;
    let guard = manager
        .acquire(&key("acme"), connector, Duration::from_millis(50))
        .await
        .expect("acquire after release");
    guard.release().await;
}

#[tokio::test]
async fn test_waiter_served_when_slot_frees_within_deadline() {
    let mock = Arc::new(MockConnector::new(SourceKind::HttpApi));
    let manager = Arc::new(PoolManager::new(options(1)));
    let connector: Arc<dyn Connector> = mock;

    let held = manager
        .acquire(&key("acme"), Arc::clone(&connector), Duration::from_millis(50))
        .await
        .expect("first acquire");

    let waiter = {
        let manager = Arc::clone(&manager);
        let connector = Arc::clone(&connector);
        tokio::spawn(async move {
            manager
                .acquire(&key("acme"), connector, Duration::from_secs(2))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    held.release().await;

    let guard = waiter.await.expect("task").expect("queued acquire succeeds");
    guard.release().await;
}

// ==================== Release and Discard Tests ====================

#[tokio::test]
async fn test_release_returns_handle_to_idle_set() {
    let mock = Arc::new(MockConnector::new(SourceKind::HttpApi));
    let manager = Arc::new(PoolManager::new(options(4)));
    let connector: Arc<dyn Connector> = Arc::clone(&mock) as Arc<dyn Connector>;

    let guard = manager
        .acquire(&key("acme"), Arc::clone(&connector), Duration::from_millis(50))
        .await
        .expect("acquire");
    guard.release().await;

    let guard = manager
        .acquire(&key("acme"), connector, Duration::from_millis(50))
        .await
        .expect("second acquire");
    guard.release().await;

    // Both checkouts reused the same backend handle.
    assert_eq!(mock.connects(), 1);
    assert_eq!(mock.closes(), 0);
}

#[tokio::test]
async fn test_discard_destroys_handle() {
    let mock = Arc::new(MockConnector::new(SourceKind::HttpApi));
    let manager = Arc::new(PoolManager::new(options(4)));
    let connector: Arc<dyn Connector> = Arc::clone(&mock) as Arc<dyn Connector>;

    let guard = manager
        .acquire(&key("acme"), Arc::clone(&connector), Duration::from_millis(50))
        .await
        .expect("acquire");
    guard.discard().await;

    assert_eq!(mock.closes(), 1);
    assert_eq!(mock.open_handles(), 0);

    let guard = manager
        .acquire(&key("acme"), connector, Duration::from_millis(50))
        .await
        .expect("acquire after discard");
    guard.release().await;
    assert_eq!(mock.connects(), 2);

    let stats = manager.stats(&key("acme")).await.expect("stats");
    assert_eq!(stats.discards, 1);
    assert_eq!(stats.connections_created, 2);
}

#[tokio::test]
async fn test_dropped_guard_destroys_handle_in_background() {
    let mock = Arc::new(MockConnector::new(SourceKind::HttpApi));
    let manager = Arc::new(PoolManager::new(options(1)));
    let connector: Arc<dyn Connector> = Arc::clone(&mock) as Arc<dyn Connector>;

    let guard = manager
        .acquire(&key("acme"), Arc::clone(&connector), Duration::from_millis(50))
        .await
        .expect("acquire");
    drop(guard);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.closes(), 1);
    assert_eq!(mock.open_handles(), 0);

    // The slot is usable again afterwards.
    let guard = manager
        .acquire(&key("acme"), connector, Duration::from_millis(100))
        .await
        .expect("slot freed after drop");
    guard.release().await;
}

// ==================== Tenant Isolation Tests ====================

#[tokio::test]
async fn test_tenant_outage_does_not_starve_other_tenant() {
    let broken = Arc::new(MockConnector::new(SourceKind::HttpApi).with_connect_outage());
    let healthy = Arc::new(MockConnector::new(SourceKind::HttpApi));
    let manager = Arc::new(PoolManager::new(options(1)));

    // Tenant A's backend is down; every acquire fails.
    for _ in 0..3 {
        let denied = manager
            .acquire(
                &key("tenant-a"),
                Arc::clone(&broken) as Arc<dyn Connector>,
                Duration::from_millis(50),
            )
            .await;
        assert!(denied.is_err());
    }

    // Tenant B still has full capacity.
    let guard = manager
        .acquire(
            &key("tenant-b"),
            Arc::clone(&healthy) as Arc<dyn Connector>,
            Duration::from_millis(50),
        )
        .await
        .expect("tenant b unaffected");
    guard.release().await;
    assert_eq!(healthy.connects(), 1);
}

#[tokio::test]
async fn test_tenant_saturation_does_not_consume_other_partition() {
    let mock = Arc::new(MockConnector::new(SourceKind::HttpApi));
    let manager = Arc::new(PoolManager::new(options(1)));
    let connector: Arc<dyn Connector> = Arc::clone(&mock) as Arc<dyn Connector>;

    // Tenant A holds its only slot.
    let held = manager
        .acquire(&key("tenant-a"), Arc::clone(&connector), Duration::from_millis(50))
        .await
        .expect("tenant a acquire");

    // Tenant B's partition is independent.
    let guard = manager
        .acquire(&key("tenant-b"), Arc::clone(&connector), Duration::from_millis(50))
        .await
        .expect("tenant b acquire");

    guard.release().await;
    held.release().await;
    assert_eq!(manager.pool_count().await, 2);
}

// ==================== Idle Eviction Tests ====================

#[tokio::test]
async fn test_idle_handles_evicted_after_period() {
    let mock = Arc::new(MockConnector::new(SourceKind::HttpApi));
    let manager = Arc::new(PoolManager::new(PoolOptions {
        max_size: 4,
        min_idle: 0,
        idle_period: Some(Duration::from_millis(20)),
        test_on_borrow: true,
    }));
    let connector: Arc<dyn Connector> = Arc::clone(&mock) as Arc<dyn Connector>;

    let guard = manager
        .acquire(&key("acme"), connector, Duration::from_millis(50))
        .await
        .expect("acquire");
    guard.release().await;
    assert_eq!(mock.open_handles(), 1);

    tokio::time::sleep(Duration::from_millis(40)).await;
    manager.sweep().await;

    assert_eq!(mock.open_handles(), 0);
    assert_eq!(mock.closes(), 1);
}

#[tokio::test]
async fn test_eviction_keeps_minimum_watermark() {
    let mock = Arc::new(MockConnector::new(SourceKind::HttpApi));
    let manager = Arc::new(PoolManager::new(PoolOptions {
        max_size: 4,
        min_idle: 1,
        idle_period: Some(Duration::from_millis(20)),
        test_on_borrow: true,
    }));
    let connector: Arc<dyn Connector> = Arc::clone(&mock) as Arc<dyn Connector>;

    let first = manager
        .acquire(&key("acme"), Arc::clone(&connector), Duration::from_millis(50))
        .await
        .expect("acquire");
    let second = manager
        .acquire(&key("acme"), connector, Duration::from_millis(50))
        .await
        .expect("acquire");
    first.release().await;
    second.release().await;
    assert_eq!(mock.open_handles(), 2);

    tokio::time::sleep(Duration::from_millis(40)).await;
    manager.sweep().await;

    assert_eq!(mock.open_handles(), 1);
    assert_eq!(mock.closes(), 1);
}

#[tokio::test]
async fn test_background_sweeper_runs() {
    let mock = Arc::new(MockConnector::new(SourceKind::HttpApi));
    let manager = Arc::new(PoolManager::new(PoolOptions {
        max_size: 4,
        min_idle: 0,
        idle_period: Some(Duration::from_millis(10)),
        test_on_borrow: true,
    }));
    let sweeper = PoolManager::start_sweeper(&manager, Duration::from_millis(15));
    let connector: Arc<dyn Connector> = Arc::clone(&mock) as Arc<dyn Connector>;

    let guard = manager
        .acquire(&key("acme"), connector, Duration::from_millis(50))
        .await
        .expect("acquire");
    guard.release().await;

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(mock.open_handles(), 0);
    sweeper.abort();
}

// ==================== Stats Tests ====================

#[tokio::test]
async fn test_stats_reflect_activity() {
    let mock = Arc::new(MockConnector::new(SourceKind::HttpApi));
    let manager = Arc::new(PoolManager::new(options(2)));
    let connector: Arc<dyn Connector> = Arc::clone(&mock) as Arc<dyn Connector>;

    let guard = manager
        .acquire(&key("acme"), Arc::clone(&connector), Duration::from_millis(50))
        .await
        .expect("acquire");
    guard.release().await;
    let guard = manager
        .acquire(&key("acme"), connector, Duration::from_millis(50))
        .await
        .expect("acquire");
    guard.release().await;

    let stats = manager.stats(&key("acme")).await.expect("stats");
    assert_eq!(stats.acquisitions, 2);
    assert_eq!(stats.connections_created, 1);
    assert_eq!(stats.connections_closed, 0);
    assert_eq!(stats.exhausted_count, 0);
}
