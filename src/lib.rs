pub mod catalog_cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod format;
pub mod gateway;
pub mod metadata;
pub mod node;
pub mod router;

pub use catalog_cache::{CacheError, CatalogCache, CatalogSource, StoreSource};
pub use coordinator::{CoordinatorError, CoordinatorOptions, EnableShardingOutcome, ShardingCoordinator};
pub use metadata::{DatabaseMetadata, MemMetaStore, MetaStore, SledMetaStore, StoreError};
pub use node::CatalogNode;
