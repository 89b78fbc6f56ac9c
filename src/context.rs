//! Application context.
//!
//! One [`AppContext`] is constructed at startup and owns the store handle
//! and both caches; components receive it (or the specific collaborator
//! they need) explicitly instead of reaching for process-global state.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::cache::{NodeCache, NodeSource, PullCache, UserCache, UserSource};
use crate::config::{CacheConfig, Config, ReservoirConfig};
use crate::error::FleetError;
use crate::netstatus::NetworkStatus;
use crate::node::Node;
use crate::reservoir::EditReservoir;
use crate::store::{SqliteStore, Store};

/// Owned per-process collaborators.
pub struct AppContext {
    pub store: Arc<dyn Store>,
    pub nodes: NodeCache,
    pub users: UserCache,
    node_uuid: Option<Uuid>,
}

impl AppContext {
    /// Build the context around an existing store implementation.
    pub fn new(store: Arc<dyn Store>, cache: &CacheConfig) -> Self {
        let gap = Duration::from_secs(cache.min_gap_secs);
        let nodes = PullCache::new(
            NodeSource::new(Arc::clone(&store), cache.include_deleted, cache.exclude_reserved),
            gap,
        );
        let users = PullCache::new(UserSource::new(Arc::clone(&store), cache.enabled_only), gap);
        Self {
            store,
            nodes,
            users,
            node_uuid: None,
        }
    }

    /// Open the configured SQLite registry and build the context.
    pub async fn from_config(config: &Config) -> Result<Self, FleetError> {
        let store = SqliteStore::new(&config.store.path);
        store.migrate().await?;
        let mut context = Self::new(Arc::new(store), &config.cache);
        if let Some(raw) = &config.node_uuid {
            context.node_uuid = Some(Uuid::parse_str(raw.trim())?);
        }
        Ok(context)
    }

    /// Pin the uuid of the node this process runs on.
    pub fn with_node_uuid(mut self, uuid: Uuid) -> Self {
        self.node_uuid = Some(uuid);
        self
    }

    /// A reservoir committing through this context's store.
    pub fn reservoir(&self, statement: &str, config: &ReservoirConfig) -> EditReservoir {
        EditReservoir::new(
            Arc::clone(&self.store),
            statement,
            config.max_rows,
            Duration::from_secs(config.max_age_secs),
            config.blocking,
        )
    }

    /// Identify which fleet node this process runs on: a configured uuid
    /// wins, then the observed public IPv4.
    pub async fn whoami(&self, status: &NetworkStatus) -> Result<Option<Node>, FleetError> {
        let nodes = self.nodes.all(true).await?;

        if let Some(uuid) = self.node_uuid {
            if let Some(node) = nodes.iter().find(|n| n.uuid == uuid) {
                return Ok(Some(node.clone()));
            }
            warn!(%uuid, "configured node uuid not present in the registry");
        }

        if let Some(ip) = status.ipv4 {
            if let Some(node) = nodes.iter().find(|n| n.ipv4 == Some(ip)) {
                return Ok(Some(node.clone()));
            }
        }
        Ok(None)
    }

    /// Drain in-flight background work. Call once before exit.
    pub async fn shutdown(&self) {
        self.nodes.join().await;
        self.users.join().await;
    }
}
