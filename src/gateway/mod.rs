//! Boundary of the service: validates admin requests, hands them to the
//! coordinator or the local cache, and folds every failure into one of a
//! closed set of [`ErrorKind`]s.

mod client;
mod command;
mod name_check;
mod server;

use std::sync::Arc;

use tracing::{info, warn};

pub use client::AdminClient;
pub use command::{AdminRequest, AdminResponse, ErrorKind};
pub use name_check::{check_database_name, check_shard_name, NameError};
pub use server::{ServerHandle, TcpServer, MAX_REQUEST_LINE};

use crate::catalog_cache::{CacheError, CatalogCache};
use crate::coordinator::{CoordinatorError, ShardingCoordinator};
use crate::metadata::{self, StoreError};

pub struct Gateway {
    // absent on router nodes
    coordinator: Option<Arc<ShardingCoordinator>>,
    cache: Arc<CatalogCache>,
    max_name_len: usize,
}

impl Gateway {
    pub fn coordinator(
        coordinator: Arc<ShardingCoordinator>,
        cache: Arc<CatalogCache>,
        max_name_len: usize,
    ) -> Self {
        Self {
            coordinator: Some(coordinator),
            cache,
            max_name_len,
        }
    }

    pub fn router(cache: Arc<CatalogCache>, max_name_len: usize) -> Self {
        Self {
            coordinator: None,
            cache,
            max_name_len,
        }
    }

    pub async fn handle(&self, req: AdminRequest) -> AdminResponse {
        let database = match &req {
            AdminRequest::EnableSharding { database }
            | AdminRequest::CreateDatabase { database, .. }
            | AdminRequest::GetDatabase { database }
            | AdminRequest::EnsureShardingEnabled { database }
            | AdminRequest::Lookup { database }
            | AdminRequest::InvalidateCache { database } => Some(database.as_str()),
            AdminRequest::ListDatabases | AdminRequest::Ping => None,
        };
        if let Some(database) = database {
            if let Err(e) = check_database_name(database, self.max_name_len) {
                warn!("{} rejected, err: {}", req.name(), e);
                return AdminResponse::error(ErrorKind::InvalidName, e.to_string());
            }
        }

        match req {
            AdminRequest::EnableSharding { database } => self.enable_sharding(&database).await,
            AdminRequest::CreateDatabase {
                database,
                primary_shard,
            } => self.create_database(&database, &primary_shard).await,
            AdminRequest::GetDatabase { database } => self.get_database(&database).await,
            AdminRequest::EnsureShardingEnabled { database } => {
                self.ensure_sharding_enabled(&database).await
            }
            AdminRequest::ListDatabases => self.list_databases().await,
            AdminRequest::Lookup { database } => self.lookup(&database).await,
            AdminRequest::InvalidateCache { database } => {
                self.cache.invalidate(&database);
                AdminResponse::ok()
            }
            AdminRequest::Ping => AdminResponse::ok(),
        }
    }

    fn require_coordinator(&self) -> Result<&Arc<ShardingCoordinator>, AdminResponse> {
        self.coordinator.as_ref().ok_or_else(|| {
            AdminResponse::error(
                ErrorKind::NotSupported,
                "command must be sent to the coordinator",
            )
        })
    }

    pub async fn enable_sharding(&self, database: &str) -> AdminResponse {
        let coordinator = match self.require_coordinator() {
            Ok(c) => c,
            Err(resp) => return resp,
        };

        info!("enableSharding, database: {}", database);
        match coordinator.enable_sharding(database).await {
            Ok(outcome) => AdminResponse {
                version: Some(outcome.version),
                already_enabled: Some(outcome.already_enabled),
                unreachable_routers: outcome.invalidation.failed,
                ..AdminResponse::ok()
            },
            Err(e) => coordinator_error_response(e),
        }
    }

    async fn ensure_sharding_enabled(&self, database: &str) -> AdminResponse {
        let coordinator = match self.require_coordinator() {
            Ok(c) => c,
            Err(resp) => return resp,
        };

        match coordinator.ensure_sharding_enabled(database).await {
            Ok(meta) => AdminResponse::ok().with_database(meta),
            Err(e) => coordinator_error_response(e),
        }
    }

    async fn create_database(&self, database: &str, primary_shard: &str) -> AdminResponse {
        let coordinator = match self.require_coordinator() {
            Ok(c) => c,
            Err(resp) => return resp,
        };
        if !check_shard_name(primary_shard) {
            return AdminResponse::error(
                ErrorKind::BadRequest,
                format!("invalid primary shard {primary_shard:?}"),
            );
        }

        let (name, shard) = (database.to_owned(), primary_shard.to_owned());
        match metadata::blocking(coordinator.store(), move |s| s.create_database(&name, &shard))
            .await
        {
            Ok(meta) => AdminResponse::ok().with_database(meta),
            Err(e) => store_error_response(e),
        }
    }

    async fn get_database(&self, database: &str) -> AdminResponse {
        let coordinator = match self.require_coordinator() {
            Ok(c) => c,
            Err(resp) => return resp,
        };

        let name = database.to_owned();
        match metadata::blocking(coordinator.store(), move |s| s.get(&name)).await {
            Ok(meta) => AdminResponse::ok().with_database(meta),
            Err(e) => store_error_response(e),
        }
    }

    async fn list_databases(&self) -> AdminResponse {
        let coordinator = match self.require_coordinator() {
            Ok(c) => c,
            Err(resp) => return resp,
        };

        match metadata::blocking(coordinator.store(), |s| s.list_databases()).await {
            Ok(databases) => AdminResponse {
                databases: Some(databases),
                ..AdminResponse::ok()
            },
            Err(e) => store_error_response(e),
        }
    }

    async fn lookup(&self, database: &str) -> AdminResponse {
        match self.cache.lookup(database).await {
            Ok(meta) => AdminResponse::ok().with_database(meta),
            Err(CacheError::Miss(name)) => AdminResponse::error(
                ErrorKind::CacheMiss,
                format!("database {name} not found"),
            ),
            Err(CacheError::Source(e)) => store_error_response(e),
        }
    }
}

fn coordinator_error_response(e: CoordinatorError) -> AdminResponse {
    let kind = match &e {
        CoordinatorError::DatabaseNotFound(_) => ErrorKind::DatabaseNotFound,
        CoordinatorError::NameConflict { existing, .. } => {
            return AdminResponse {
                existing_database: Some(existing.clone()),
                ..AdminResponse::error(ErrorKind::NameConflict, e.to_string())
            }
        }
        CoordinatorError::ShardingNotEnabled(_) => ErrorKind::ShardingNotEnabled,
        CoordinatorError::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
        CoordinatorError::Timeout(_) => ErrorKind::Timeout,
        // store detail stays in the log
        CoordinatorError::Unavailable(_) => {
            return AdminResponse::error(ErrorKind::Unavailable, "metadata store unavailable")
        }
    };
    AdminResponse::error(kind, e.to_string())
}

fn store_error_response(e: StoreError) -> AdminResponse {
    match e {
        StoreError::NotFound(name) => AdminResponse::error(
            ErrorKind::DatabaseNotFound,
            format!("database {name} not found"),
        ),
        StoreError::AlreadyExists(name) => AdminResponse::error(
            ErrorKind::DatabaseExists,
            format!("database {name} already exists"),
        ),
        StoreError::NameConflict {
            requested,
            existing,
        } => AdminResponse {
            existing_database: Some(existing.clone()),
            ..AdminResponse::error(
                ErrorKind::NameConflict,
                format!("database {requested} conflicts with existing database {existing}"),
            )
        },
        StoreError::VersionConflict { .. } => AdminResponse::error(
            ErrorKind::ConcurrentModification,
            "database modified concurrently",
        ),
        StoreError::Unavailable(_) | StoreError::Corrupted { .. } => {
            warn!("metadata store failure, err: {}", e);
            AdminResponse::error(ErrorKind::Unavailable, "metadata store unavailable")
        }
    }
}
