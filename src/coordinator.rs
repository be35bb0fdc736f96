use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::metadata::{self, DatabaseMetadata, MetaStore, StoreError};
use crate::router::{InvalidationReport, RouterRegistry};

// caps the exponential backoff at 64x the base
const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("database {0} not found")]
    DatabaseNotFound(String),
    #[error("database {requested} conflicts with existing database {existing}")]
    NameConflict { requested: String, existing: String },
    #[error("sharding is not enabled for database {0}")]
    ShardingNotEnabled(String),
    #[error("database {database} modified concurrently, gave up after {attempts} attempts")]
    ConcurrentModification { database: String, attempts: u32 },
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
    #[error("request on database {0} exceeded its deadline")]
    Timeout(String),
}

impl CoordinatorError {
    fn from_store(database: &str, e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => CoordinatorError::DatabaseNotFound(database.to_owned()),
            StoreError::NameConflict {
                requested,
                existing,
            } => CoordinatorError::NameConflict {
                requested,
                existing,
            },
            StoreError::VersionConflict { .. } => CoordinatorError::ConcurrentModification {
                database: database.to_owned(),
                attempts: 1,
            },
            StoreError::Unavailable(_) | StoreError::Corrupted { .. } | StoreError::AlreadyExists(_) => {
                CoordinatorError::Unavailable(e.to_string())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub max_conflict_retries: u32,
    pub conflict_backoff: Duration,
    pub request_timeout: Duration,
    pub invalidate_timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self::from_config(&Configuration::default())
    }
}

impl CoordinatorOptions {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            max_conflict_retries: config.max_conflict_retries,
            conflict_backoff: config.conflict_backoff(),
            request_timeout: config.request_timeout(),
            invalidate_timeout: config.invalidate_timeout(),
        }
    }

    fn backoff(&self, conflicts: u32) -> Duration {
        self.conflict_backoff * (1 << conflicts.saturating_sub(1).min(MAX_BACKOFF_SHIFT))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableShardingOutcome {
    pub database: String,
    pub version: u64,
    pub already_enabled: bool,
    pub attempts: u32,
    pub invalidation: InvalidationReport,
}

/// Drives a database from unsharded to sharding-enabled.
///
/// The only write is the store's compare-and-set; caches are told
/// afterwards and a failed push never undoes a commit.
pub struct ShardingCoordinator {
    store: Arc<dyn MetaStore>,
    routers: Arc<RouterRegistry>,
    opts: CoordinatorOptions,
}

impl ShardingCoordinator {
    pub fn new(
        store: Arc<dyn MetaStore>,
        routers: Arc<RouterRegistry>,
        opts: CoordinatorOptions,
    ) -> Self {
        Self {
            store,
            routers,
            opts,
        }
    }

    pub fn store(&self) -> &Arc<dyn MetaStore> {
        &self.store
    }

    pub fn routers(&self) -> &Arc<RouterRegistry> {
        &self.routers
    }

    pub async fn enable_sharding(
        &self,
        database: &str,
    ) -> Result<EnableShardingOutcome, CoordinatorError> {
        let deadline = Instant::now() + self.opts.request_timeout;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let meta = self.fetch(database, deadline).await?;
            if meta.sharding_enabled {
                debug!(
                    "sharding already enabled for {}, version {}",
                    database, meta.version
                );
                return Ok(EnableShardingOutcome {
                    database: database.to_owned(),
                    version: meta.version,
                    already_enabled: true,
                    attempts,
                    invalidation: InvalidationReport::default(),
                });
            }

            if Instant::now() >= deadline {
                return Err(CoordinatorError::Timeout(database.to_owned()));
            }

            // once issued the swap is awaited, a timeout never hides a commit
            let expected = meta.version;
            let name = database.to_owned();
            let res = metadata::blocking(&self.store, move |s| {
                s.compare_and_set_sharding_enabled(&name, expected)
            })
            .await;

            match res {
                Ok(version) => {
                    info!(
                        "sharding enabled for {}, version {} -> {}",
                        database, expected, version
                    );

                    let invalidation = self
                        .routers
                        .invalidate_all(database, self.opts.invalidate_timeout)
                        .await;
                    if !invalidation.is_complete() {
                        warn!(
                            "{} routers still hold stale metadata for {}: {:?}",
                            invalidation.failed.len(),
                            database,
                            invalidation.failed
                        );
                    }

                    return Ok(EnableShardingOutcome {
                        database: database.to_owned(),
                        version,
                        already_enabled: false,
                        attempts,
                        invalidation,
                    });
                }
                Err(StoreError::VersionConflict { expected, actual }) => {
                    if attempts > self.opts.max_conflict_retries {
                        warn!(
                            "giving up enabling sharding for {} after {} attempts",
                            database, attempts
                        );
                        return Err(CoordinatorError::ConcurrentModification {
                            database: database.to_owned(),
                            attempts,
                        });
                    }

                    let backoff = self.opts.backoff(attempts);
                    debug!(
                        "version conflict on {}, expected: {}, actual: {}, retry after {:?}",
                        database, expected, actual, backoff
                    );
                    if Instant::now() + backoff >= deadline {
                        return Err(CoordinatorError::Timeout(database.to_owned()));
                    }
                    tokio::time::sleep(backoff).await;
                }
                Err(e @ StoreError::Unavailable(_)) => {
                    // the swap may have landed before the failure, and a retry
                    // that finds it enabled pushes nothing
                    warn!(
                        "compare and set on {} ended with unknown outcome, err: {}",
                        database, e
                    );
                    self.routers
                        .invalidate_all(database, self.opts.invalidate_timeout)
                        .await;
                    return Err(CoordinatorError::from_store(database, e));
                }
                Err(e) => {
                    warn!("failed to enable sharding for {}, err: {}", database, e);
                    return Err(CoordinatorError::from_store(database, e));
                }
            }
        }
    }

    /// Read path for the collection-sharding collaborator, always served by
    /// the store.
    pub async fn ensure_sharding_enabled(
        &self,
        database: &str,
    ) -> Result<DatabaseMetadata, CoordinatorError> {
        let deadline = Instant::now() + self.opts.request_timeout;
        let meta = self.fetch(database, deadline).await?;
        if !meta.sharding_enabled {
            return Err(CoordinatorError::ShardingNotEnabled(database.to_owned()));
        }
        Ok(meta)
    }

    async fn fetch(
        &self,
        database: &str,
        deadline: Instant,
    ) -> Result<DatabaseMetadata, CoordinatorError> {
        let name = database.to_owned();
        let fut = metadata::blocking(&self.store, move |s| s.get(&name));

        match tokio::time::timeout_at(deadline, fut).await {
            Err(_) => {
                warn!("fetching {} exceeded the request deadline", database);
                Err(CoordinatorError::Timeout(database.to_owned()))
            }
            Ok(res) => res.map_err(|e| CoordinatorError::from_store(database, e)),
        }
    }
}
