use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;

use super::{check_same_name, fold_name, DatabaseMetadata, MetaStore, StoreError};

/// In-memory metadata store. Same semantics as [`super::SledMetaStore`],
/// with switches for simulating an unreachable store.
pub struct MemMetaStore {
    databases: RwLock<BTreeMap<String, DatabaseMetadata>>,
    case_insensitive: bool,

    available: AtomicBool,
    writes: AtomicU64,
}

impl Default for MemMetaStore {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MemMetaStore {
    pub fn new(case_insensitive: bool) -> Self {
        Self {
            databases: RwLock::new(BTreeMap::new()),
            case_insensitive,
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
        }
    }

    /// Installs a record as-is, bypassing versioning.
    pub fn insert(&self, meta: DatabaseMetadata) {
        let key = fold_name(&meta.name, self.case_insensitive);
        self.databases.write().insert(key, meta);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of committed mutations.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }
}

impl MetaStore for MemMetaStore {
    fn get(&self, name: &str) -> Result<DatabaseMetadata, StoreError> {
        self.check_available()?;

        let key = fold_name(name, self.case_insensitive);
        let databases = self.databases.read();
        let meta = databases
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))?;
        check_same_name(name, meta)?;

        Ok(meta.clone())
    }

    fn compare_and_set_sharding_enabled(
        &self,
        name: &str,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        self.check_available()?;

        let key = fold_name(name, self.case_insensitive);
        let mut databases = self.databases.write();
        let meta = databases
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))?;
        check_same_name(name, meta)?;

        if meta.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: meta.version,
            });
        }

        *meta = meta.with_sharding_enabled(Utc::now());
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(meta.version)
    }

    fn create_database(
        &self,
        name: &str,
        primary_shard: &str,
    ) -> Result<DatabaseMetadata, StoreError> {
        self.check_available()?;

        let key = fold_name(name, self.case_insensitive);
        let mut databases = self.databases.write();
        if let Some(existing) = databases.get(&key) {
            check_same_name(name, existing)?;
            return Err(StoreError::AlreadyExists(name.to_owned()));
        }

        let meta = DatabaseMetadata::new(name, primary_shard);
        databases.insert(key, meta.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(meta)
    }

    fn drop_database(&self, name: &str) -> Result<(), StoreError> {
        self.check_available()?;

        let key = fold_name(name, self.case_insensitive);
        let mut databases = self.databases.write();
        let meta = databases
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))?;
        check_same_name(name, meta)?;

        databases.remove(&key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list_databases(&self) -> Result<Vec<DatabaseMetadata>, StoreError> {
        self.check_available()?;
        Ok(self.databases.read().values().cloned().collect())
    }
}
