//! Concurrency and isolation of enableSharding against a shared store.

use std::sync::Arc;
use std::time::Duration;

use catalogserver::catalog_cache::{CatalogCache, StoreSource};
use catalogserver::coordinator::{CoordinatorError, CoordinatorOptions, ShardingCoordinator};
use catalogserver::metadata::{MemMetaStore, MetaStore, SledMetaStore};
use catalogserver::router::{LocalRouter, RouterRegistry};
use tokio::task::JoinSet;

fn options() -> CoordinatorOptions {
    CoordinatorOptions {
        max_conflict_retries: 5,
        conflict_backoff: Duration::from_millis(1),
        request_timeout: Duration::from_secs(10),
        invalidate_timeout: Duration::from_millis(200),
    }
}

fn coordinator(store: Arc<dyn MetaStore>) -> Arc<ShardingCoordinator> {
    Arc::new(ShardingCoordinator::new(
        store,
        Arc::new(RouterRegistry::new()),
        options(),
    ))
}

/// Every concurrent request succeeds and exactly one of them commits.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enables_commit_once() {
    let store = Arc::new(MemMetaStore::default());
    store.create_database("sales", "shard0000").unwrap();
    let writes_before = store.write_count();

    let coord = coordinator(store.clone());
    let mut set = JoinSet::new();
    for _ in 0..16 {
        let coord = coord.clone();
        set.spawn(async move { coord.enable_sharding("sales").await });
    }

    let mut committed = 0;
    while let Some(res) = set.join_next().await {
        let outcome = res.unwrap().unwrap();
        assert_eq!(outcome.version, 2);
        if !outcome.already_enabled {
            committed += 1;
        }
    }

    assert_eq!(committed, 1, "exactly one request should commit");
    assert_eq!(store.write_count(), writes_before + 1);

    let meta = store.get("sales").unwrap();
    assert!(meta.sharding_enabled);
    assert_eq!(meta.version, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enables_on_sled() {
    let store = Arc::new(SledMetaStore::temporary(true).unwrap());
    store.create_database("sales", "shard0000").unwrap();

    let coord = coordinator(store.clone());
    let mut set = JoinSet::new();
    for _ in 0..8 {
        let coord = coord.clone();
        set.spawn(async move { coord.enable_sharding("sales").await });
    }

    let mut committed = 0;
    while let Some(res) = set.join_next().await {
        if !res.unwrap().unwrap().already_enabled {
            committed += 1;
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(store.get("sales").unwrap().version, 2);
}

#[tokio::test]
async fn test_databases_are_isolated() {
    let store = Arc::new(MemMetaStore::default());
    store.create_database("sales", "shard0000").unwrap();
    store.create_database("hr", "shard0001").unwrap();

    let cache = Arc::new(CatalogCache::new(
        Arc::new(StoreSource::new(store.clone())),
        Duration::from_secs(60),
    ));
    let routers = Arc::new(RouterRegistry::new());
    routers.register(Arc::new(LocalRouter::new("local", cache.clone())));
    let coord = ShardingCoordinator::new(store.clone(), routers, options());

    cache.lookup("sales").await.unwrap();
    cache.lookup("hr").await.unwrap();

    let outcome = coord.enable_sharding("sales").await.unwrap();
    assert!(!outcome.already_enabled);
    assert_eq!(outcome.invalidation.acked, vec!["local".to_string()]);

    let hr = store.get("hr").unwrap();
    assert!(!hr.sharding_enabled);
    assert_eq!(hr.version, 1);

    // the untouched database keeps its cached entry
    assert_eq!(cache.peek("hr").map(|m| m.version), Some(1));
    assert!(cache.lookup("sales").await.unwrap().sharding_enabled);
}

#[tokio::test]
async fn test_missing_and_unavailable() {
    let store = Arc::new(MemMetaStore::default());
    let coord = coordinator(store.clone());

    assert_eq!(
        coord.enable_sharding("sales").await.unwrap_err(),
        CoordinatorError::DatabaseNotFound("sales".into())
    );

    store.create_database("sales", "shard0000").unwrap();
    store.set_available(false);
    assert!(matches!(
        coord.enable_sharding("sales").await,
        Err(CoordinatorError::Unavailable(_))
    ));

    store.set_available(true);
    let meta = store.get("sales").unwrap();
    assert!(!meta.sharding_enabled);
    assert_eq!(meta.version, 1);
}

#[tokio::test]
async fn test_case_folded_name_conflicts() {
    let store = Arc::new(MemMetaStore::default());
    store.create_database("Sales", "shard0000").unwrap();
    let coord = coordinator(store.clone());

    assert!(matches!(
        coord.enable_sharding("sales").await,
        Err(CoordinatorError::NameConflict { .. })
    ));
    assert!(!store.get("Sales").unwrap().sharding_enabled);
}
