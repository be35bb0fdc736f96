//! Routing nodes that hold a catalog cache and must hear about commits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::catalog_cache::CatalogCache;
use crate::gateway::{AdminClient, AdminRequest};

#[async_trait]
pub trait RouterNode: Send + Sync {
    fn id(&self) -> &str;
    async fn invalidate(&self, database: &str) -> Result<()>;
}

/// The cache living in this process.
pub struct LocalRouter {
    id: String,
    cache: Arc<CatalogCache>,
}

impl LocalRouter {
    pub fn new(id: impl Into<String>, cache: Arc<CatalogCache>) -> Self {
        Self {
            id: id.into(),
            cache,
        }
    }
}

#[async_trait]
impl RouterNode for LocalRouter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invalidate(&self, database: &str) -> Result<()> {
        self.cache.invalidate(database);
        Ok(())
    }
}

/// A router node reached over the admin protocol.
pub struct RemoteRouter {
    client: AdminClient,
}

impl RemoteRouter {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: AdminClient::new(addr, timeout),
        }
    }
}

#[async_trait]
impl RouterNode for RemoteRouter {
    fn id(&self) -> &str {
        self.client.addr()
    }

    async fn invalidate(&self, database: &str) -> Result<()> {
        let resp = self
            .client
            .call(&AdminRequest::InvalidateCache {
                database: database.to_owned(),
            })
            .await?;

        if !resp.ok {
            bail!(
                "router {} rejected invalidation: {:?} {}",
                self.id(),
                resp.error_kind,
                resp.errmsg.unwrap_or_default()
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub acked: Vec<String>,
    pub failed: Vec<String>,
}

impl InvalidationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct RouterRegistry {
    nodes: ArcSwap<Vec<Arc<dyn RouterNode>>>,
}

impl Default for RouterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterRegistry {
    pub fn new() -> Self {
        Self {
            nodes: ArcSwap::from_pointee(vec![]),
        }
    }

    pub fn register(&self, node: Arc<dyn RouterNode>) {
        info!("register routing node {}", node.id());
        self.nodes.rcu(|nodes| {
            let mut nodes = nodes
                .iter()
                .filter(|n| n.id() != node.id())
                .cloned()
                .collect::<Vec<_>>();
            nodes.push(node.clone());
            nodes
        });
    }

    pub fn deregister(&self, id: &str) {
        info!("deregister routing node {}", id);
        self.nodes.rcu(|nodes| {
            nodes
                .iter()
                .filter(|n| n.id() != id)
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.load().iter().map(|n| n.id().to_owned()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.load().is_empty()
    }

    /// Pushes the invalidation to every node in parallel. A node that errors
    /// or misses `timeout` is reported as failed and left to its lease.
    pub async fn invalidate_all(&self, database: &str, timeout: Duration) -> InvalidationReport {
        let nodes = self.nodes.load_full();

        let results = futures::future::join_all(nodes.iter().map(|node| async move {
            let res = tokio::time::timeout(timeout, node.invalidate(database)).await;
            (node.id().to_owned(), res)
        }))
        .await;

        let mut report = InvalidationReport::default();
        for (id, res) in results {
            match res {
                Ok(Ok(())) => {
                    debug!("router {} invalidated {}", id, database);
                    report.acked.push(id);
                }
                Ok(Err(e)) => {
                    warn!("failed to invalidate {} on router {}, err: {}", database, id, e);
                    report.failed.push(id);
                }
                Err(_) => {
                    warn!(
                        "invalidate {} on router {} timed out after {:?}",
                        database, id, timeout
                    );
                    report.failed.push(id);
                }
            }
        }

        report
    }
}
