use std::path::Path;

use chrono::Utc;
use sled::{self, IVec};
use tracing::{debug, info, warn};

use super::{check_same_name, fold_name, DatabaseMetadata, MetaStore, StoreError};

const DATABASE_PREFIX: &str = "/database/";

pub struct SledMetaStore {
    db: sled::Db,
    case_insensitive: bool,
}

impl SledMetaStore {
    pub fn open(path: impl AsRef<Path>, case_insensitive: bool) -> Result<Self, StoreError> {
        info!("open metadata store at {:?}", path.as_ref());

        let db = sled::open(path.as_ref())?;
        Ok(Self {
            db,
            case_insensitive,
        })
    }

    pub fn temporary(case_insensitive: bool) -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db,
            case_insensitive,
        })
    }

    fn database_key(&self, name: &str) -> String {
        format!("{}{}", DATABASE_PREFIX, fold_name(name, self.case_insensitive))
    }

    fn encode(key: &str, meta: &DatabaseMetadata) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(meta).map_err(|e| StoreError::Corrupted {
            key: key.to_owned(),
            reason: e.to_string(),
        })
    }

    fn decode(key: &str, raw: &[u8]) -> Result<DatabaseMetadata, StoreError> {
        serde_json::from_slice(raw).map_err(|e| StoreError::Corrupted {
            key: key.to_owned(),
            reason: e.to_string(),
        })
    }

    // returns the raw bytes too, they are the expected value of the swap
    fn read_record(&self, name: &str) -> Result<(String, IVec, DatabaseMetadata), StoreError> {
        let key = self.database_key(name);
        let Some(raw) = self.db.get(key.as_bytes())? else {
            return Err(StoreError::NotFound(name.to_owned()));
        };

        let meta = Self::decode(&key, &raw)?;
        check_same_name(name, &meta)?;

        Ok((key, raw, meta))
    }
}

impl MetaStore for SledMetaStore {
    fn get(&self, name: &str) -> Result<DatabaseMetadata, StoreError> {
        self.read_record(name).map(|(_, _, meta)| meta)
    }

    fn compare_and_set_sharding_enabled(
        &self,
        name: &str,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let (key, raw, meta) = self.read_record(name)?;
        if meta.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: meta.version,
            });
        }

        let next = meta.with_sharding_enabled(Utc::now());
        let encoded = Self::encode(&key, &next)?;

        match self
            .db
            .compare_and_swap(key.as_bytes(), Some(&raw), Some(encoded))?
        {
            Ok(()) => {
                // the swap is already visible to readers if the flush fails
                self.db.flush().inspect_err(|e| {
                    warn!("database {} swapped but not flushed, err: {}", name, e)
                })?;
                debug!(
                    "database {} sharding enabled, version {} -> {}",
                    name, meta.version, next.version
                );
                Ok(next.version)
            }
            Err(e) => {
                let Some(current) = e.current else {
                    warn!("database {} dropped during compare and set", name);
                    return Err(StoreError::NotFound(name.to_owned()));
                };
                let actual = Self::decode(&key, &current)?.version;
                Err(StoreError::VersionConflict {
                    expected: expected_version,
                    actual,
                })
            }
        }
    }

    fn create_database(
        &self,
        name: &str,
        primary_shard: &str,
    ) -> Result<DatabaseMetadata, StoreError> {
        let key = self.database_key(name);
        let meta = DatabaseMetadata::new(name, primary_shard);
        let encoded = Self::encode(&key, &meta)?;

        match self
            .db
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(encoded))?
        {
            Ok(()) => {
                self.db.flush()?;
                info!("created database {} on {}", name, primary_shard);
                Ok(meta)
            }
            Err(e) => {
                let existing = match e.current {
                    Some(current) => Self::decode(&key, &current)?,
                    None => return Err(StoreError::Unavailable("lost create race".into())),
                };
                if existing.name == name {
                    Err(StoreError::AlreadyExists(name.to_owned()))
                } else {
                    Err(StoreError::NameConflict {
                        requested: name.to_owned(),
                        existing: existing.name,
                    })
                }
            }
        }
    }

    fn drop_database(&self, name: &str) -> Result<(), StoreError> {
        let (key, raw, _) = self.read_record(name)?;

        if self
            .db
            .compare_and_swap(key.as_bytes(), Some(&raw), None as Option<IVec>)?
            .is_err()
        {
            return Err(StoreError::VersionConflict {
                expected: Self::decode(&key, &raw)?.version,
                actual: self.get(name)?.version,
            });
        }
        self.db.flush()?;

        info!("dropped database {}", name);
        Ok(())
    }

    fn list_databases(&self) -> Result<Vec<DatabaseMetadata>, StoreError> {
        self.db
            .scan_prefix(DATABASE_PREFIX.as_bytes())
            .map(|kv| {
                let (k, v) = kv?;
                Self::decode(&String::from_utf8_lossy(&k), &v)
            })
            .collect()
    }
}
