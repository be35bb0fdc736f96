use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::info;

use crate::catalog_cache::{CatalogCache, CatalogSource, StoreSource};
use crate::config::{Configuration, Role};
use crate::coordinator::{CoordinatorOptions, ShardingCoordinator};
use crate::format::META_DIR;
use crate::gateway::{AdminClient, Gateway};
use crate::metadata::{MetaStore, SledMetaStore};
use crate::router::{LocalRouter, RemoteRouter, RouterRegistry};

/// Everything one process serves, wired according to its role.
pub struct CatalogNode {
    role: Role,
    gateway: Arc<Gateway>,
    cache: Arc<CatalogCache>,
    coordinator: Option<Arc<ShardingCoordinator>>,
}

impl CatalogNode {
    /// Opens the metadata store under `work_dir` for a coordinator, or
    /// points the cache at `coordinator_addr` for a router.
    pub fn open(config: &Configuration) -> Result<Self> {
        match config.role {
            Role::Coordinator => {
                let work_dir: PathBuf = config
                    .work_dir
                    .as_ref()
                    .ok_or_else(|| anyhow!("work_dir is not configured"))?
                    .into();
                let store = SledMetaStore::open(
                    work_dir.join(META_DIR),
                    config.case_insensitive_names,
                )?;
                Ok(Self::coordinator(Arc::new(store), config))
            }
            Role::Router => {
                let addr = config
                    .coordinator_addr
                    .as_ref()
                    .ok_or_else(|| anyhow!("coordinator_addr is not configured"))?;
                info!("router node pulls metadata from {}", addr);

                let source = Arc::new(AdminClient::new(addr.clone(), config.request_timeout()));
                Ok(Self::router(source, config))
            }
        }
    }

    pub fn coordinator(store: Arc<dyn MetaStore>, config: &Configuration) -> Self {
        let cache = Arc::new(CatalogCache::new(
            Arc::new(StoreSource::new(store.clone())),
            config.cache_lease(),
        ));

        let routers = Arc::new(RouterRegistry::new());
        routers.register(Arc::new(LocalRouter::new(config.name.clone(), cache.clone())));
        for addr in config.router_nodes.iter() {
            routers.register(Arc::new(RemoteRouter::new(
                addr.clone(),
                config.invalidate_timeout(),
            )));
        }

        let coordinator = Arc::new(ShardingCoordinator::new(
            store,
            routers,
            CoordinatorOptions::from_config(config),
        ));
        let gateway = Arc::new(Gateway::coordinator(
            coordinator.clone(),
            cache.clone(),
            config.max_name_len,
        ));

        Self {
            role: Role::Coordinator,
            gateway,
            cache,
            coordinator: Some(coordinator),
        }
    }

    pub fn router(source: Arc<dyn CatalogSource>, config: &Configuration) -> Self {
        let cache = Arc::new(CatalogCache::new(source, config.cache_lease()));
        let gateway = Arc::new(Gateway::router(cache.clone(), config.max_name_len));

        Self {
            role: Role::Router,
            gateway,
            cache,
            coordinator: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn gateway(&self) -> Arc<Gateway> {
        self.gateway.clone()
    }

    pub fn cache(&self) -> Arc<CatalogCache> {
        self.cache.clone()
    }

    pub fn coordinator_handle(&self) -> Option<Arc<ShardingCoordinator>> {
        self.coordinator.clone()
    }

    pub fn start_background_tasks(&self, config: &Configuration) -> Result<()> {
        info!("start background tasks ...");
        self.cache.start(config.cache_refresh_interval())?;
        info!("background tasks start finish ...");
        Ok(())
    }

    pub fn stop_background_tasks(&self) {
        self.cache.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemMetaStore;

    #[tokio::test]
    async fn test_coordinator_wiring() {
        let config = Configuration {
            router_nodes: vec!["127.0.0.1:1".into()],
            ..Default::default()
        };
        let node = CatalogNode::coordinator(Arc::new(MemMetaStore::default()), &config);

        assert_eq!(node.role(), Role::Coordinator);
        let coordinator = node.coordinator_handle().unwrap();
        assert_eq!(
            coordinator.routers().node_ids(),
            vec![config.name.clone(), "127.0.0.1:1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_open_router_needs_coordinator() {
        let config = Configuration {
            role: Role::Router,
            ..Default::default()
        };
        assert!(CatalogNode::open(&config).is_err());
    }
}
