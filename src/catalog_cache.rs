use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::metadata::{self, DatabaseMetadata, MetaStore, StoreError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache miss, database {0} not found")]
    Miss(String),
    #[error(transparent)]
    Source(#[from] StoreError),
}

/// Where a cache pulls fresh metadata from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// `Ok(None)` when the database does not exist.
    async fn fetch(&self, name: &str) -> Result<Option<DatabaseMetadata>, StoreError>;
}

pub struct StoreSource {
    store: Arc<dyn MetaStore>,
}

impl StoreSource {
    pub fn new(store: Arc<dyn MetaStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CatalogSource for StoreSource {
    async fn fetch(&self, name: &str) -> Result<Option<DatabaseMetadata>, StoreError> {
        let name = name.to_owned();

        match metadata::blocking(&self.store, move |s| s.get(&name)).await {
            Ok(meta) => Ok(Some(meta)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

struct CacheEntry {
    meta: DatabaseMetadata,
    stale: bool,
    expire_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        !self.stale && self.expire_at > Instant::now()
    }
}

/// Node-local view of database metadata.
///
/// Entries are served until invalidated or until their lease runs out,
/// after which the next lookup refetches from the source. The cache never
/// writes back, and never replaces an entry with an older version of the
/// same database incarnation, so it can lag the store but never lead it.
pub struct CatalogCache {
    source: Arc<dyn CatalogSource>,
    entries: Arc<parking_lot::RwLock<HashMap<String, CacheEntry>>>,
    lease: Duration,

    // bumped by every invalidation, a refresh that straddles one lands stale
    epoch: AtomicU64,

    stop_notifier: parking_lot::Mutex<Option<Arc<Notify>>>,
}

impl CatalogCache {
    pub fn new(source: Arc<dyn CatalogSource>, lease: Duration) -> Self {
        Self {
            source,
            entries: Arc::new(parking_lot::RwLock::new(HashMap::new())),
            lease,
            epoch: AtomicU64::new(0),
            stop_notifier: parking_lot::Mutex::new(None),
        }
    }

    pub async fn lookup(&self, name: &str) -> Result<DatabaseMetadata, CacheError> {
        if let Some(entry) = self.entries.read().get(name) {
            if entry.is_fresh() {
                return Ok(entry.meta.clone());
            }
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        debug!("refresh catalog cache entry {}", name);

        match self.source.fetch(name).await? {
            Some(meta) => Ok(self.install(name, meta, epoch)),
            None => {
                self.entries.write().remove(name);
                Err(CacheError::Miss(name.to_owned()))
            }
        }
    }

    fn install(&self, name: &str, meta: DatabaseMetadata, epoch: u64) -> DatabaseMetadata {
        let stale = self.epoch.load(Ordering::SeqCst) != epoch;
        let expire_at = Instant::now() + self.lease;

        let mut entries = self.entries.write();
        if let Some(cur) = entries.get_mut(name) {
            if cur.meta.created_at == meta.created_at && cur.meta.version > meta.version {
                // a newer refresh won the race
                return cur.meta.clone();
            }
        }

        entries.insert(
            name.to_owned(),
            CacheEntry {
                meta: meta.clone(),
                stale,
                expire_at,
            },
        );
        meta
    }

    /// Marks the entry stale; the next lookup refetches it.
    pub fn invalidate(&self, name: &str) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(entry) = self.entries.write().get_mut(name) {
            entry.stale = true;
        }
        debug!("invalidated catalog cache entry {}", name);
    }

    pub fn invalidate_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        for entry in self.entries.write().values_mut() {
            entry.stale = true;
        }
        info!("invalidated all catalog cache entries");
    }

    /// Cached value without refreshing, fresh or not.
    pub fn peek(&self, name: &str) -> Option<DatabaseMetadata> {
        self.entries.read().get(name).map(|e| e.meta.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CatalogCache {
    fn cleanup_expiration(entries: &parking_lot::RwLock<HashMap<String, CacheEntry>>) {
        let now = Instant::now();
        let keys_to_remove = entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.expire_at <= now)
            .map(|(key, _)| key.clone())
            .take(100)
            .collect::<Vec<_>>();

        if keys_to_remove.is_empty() {
            return;
        }

        let mut entries = entries.write();
        for key in keys_to_remove.iter() {
            // re-check, the entry may have been refreshed meanwhile
            if entries.get(key).is_some_and(|e| e.expire_at <= now) {
                entries.remove(key);
            }
        }
        debug!("evicted {} expired catalog cache entries", keys_to_remove.len());
    }

    /// Starts the background task evicting entries whose lease has run out.
    pub fn start(&self, interval: Duration) -> Result<()> {
        let mut stop = self.stop_notifier.lock();
        if stop.is_some() {
            return Ok(());
        }

        let notifier = Arc::new(Notify::new());
        stop.replace(notifier.clone());

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let entries = self.entries.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::cleanup_expiration(&entries);
                    }

                    _ = notifier.notified() => {
                        info!("catalog cache cleaner stopped");
                        return;
                    }
                }
            }
        });

        Ok(())
    }

    pub fn stop(&self) {
        match self.stop_notifier.lock().take() {
            Some(s) => s.notify_one(),
            None => warn!("catalog cache cleaner is not running"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemMetaStore;

    fn new_cache(store: Arc<MemMetaStore>, lease: Duration) -> CatalogCache {
        CatalogCache::new(Arc::new(StoreSource::new(store)), lease)
    }

    #[tokio::test]
    async fn test_lookup_caches() {
        let store = Arc::new(MemMetaStore::default());
        store.create_database("sales", "shard0000").unwrap();
        let cache = new_cache(store.clone(), Duration::from_secs(60));

        let meta = cache.lookup("sales").await.unwrap();
        assert!(!meta.sharding_enabled);
        assert_eq!(cache.len(), 1);

        // committed behind the cache's back, the cached view lags
        store.compare_and_set_sharding_enabled("sales", 1).unwrap();
        assert!(!cache.lookup("sales").await.unwrap().sharding_enabled);

        cache.invalidate("sales");
        let meta = cache.lookup("sales").await.unwrap();
        assert!(meta.sharding_enabled);
        assert_eq!(meta.version, 2);
    }

    #[tokio::test]
    async fn test_miss() {
        let store = Arc::new(MemMetaStore::default());
        let cache = new_cache(store, Duration::from_secs(60));

        assert_eq!(
            cache.lookup("sales").await,
            Err(CacheError::Miss("sales".into()))
        );
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_lease_expiry_refreshes() {
        let store = Arc::new(MemMetaStore::default());
        store.create_database("sales", "shard0000").unwrap();
        let cache = new_cache(store.clone(), Duration::from_millis(20));

        cache.lookup("sales").await.unwrap();
        store.compare_and_set_sharding_enabled("sales", 1).unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.lookup("sales").await.unwrap().sharding_enabled);
    }

    #[tokio::test]
    async fn test_source_error_keeps_entry() {
        let store = Arc::new(MemMetaStore::default());
        store.create_database("sales", "shard0000").unwrap();
        let cache = new_cache(store.clone(), Duration::from_secs(60));

        cache.lookup("sales").await.unwrap();
        cache.invalidate("sales");
        store.set_available(false);

        assert!(matches!(
            cache.lookup("sales").await,
            Err(CacheError::Source(StoreError::Unavailable(_)))
        ));
        assert!(cache.peek("sales").is_some());
    }

    #[tokio::test]
    async fn test_older_version_not_installed() {
        let store = Arc::new(MemMetaStore::default());
        store.create_database("sales", "shard0000").unwrap();
        let cache = new_cache(store.clone(), Duration::from_secs(60));

        let old = cache.lookup("sales").await.unwrap();
        store.compare_and_set_sharding_enabled("sales", 1).unwrap();
        cache.invalidate("sales");
        let new = cache.lookup("sales").await.unwrap();

        let epoch = cache.epoch.load(Ordering::SeqCst);
        let kept = cache.install("sales", old, epoch);
        assert_eq!(kept, new);
        assert_eq!(cache.peek("sales").unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_invalidate_during_refresh_lands_stale() {
        let store = Arc::new(MemMetaStore::default());
        store.create_database("sales", "shard0000").unwrap();
        let cache = new_cache(store.clone(), Duration::from_secs(60));

        let epoch = cache.epoch.load(Ordering::SeqCst);
        let fetched = store.get("sales").unwrap();
        store.compare_and_set_sharding_enabled("sales", 1).unwrap();
        cache.invalidate("sales");
        cache.install("sales", fetched, epoch);

        assert!(cache.lookup("sales").await.unwrap().sharding_enabled);
    }

    #[tokio::test]
    async fn test_cleanup_expiration() {
        let store = Arc::new(MemMetaStore::default());
        store.create_database("sales", "shard0000").unwrap();
        store.create_database("hr", "shard0000").unwrap();
        let cache = new_cache(store, Duration::from_millis(10));

        cache.lookup("sales").await.unwrap();
        cache.lookup("hr").await.unwrap();
        assert_eq!(cache.len(), 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        CatalogCache::cleanup_expiration(&cache.entries);
        assert!(cache.is_empty());
    }
}
