//! The engine: owner of the N keyspace actors.
//!
//! A client request is routed by database index — each index is one shard
//! with its own store directory at `<data_dir>/edis-<index>`. The engine
//! spawns every actor, then installs the router table they use to address
//! each other for MOVE.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use edis_store::{DiskStore, MemoryStore, OrderedStore, StoreError};

use crate::notify::Notifier;
use crate::shard::{spawn_shard, Router, ShardHandle};

/// Per-shard request buffer. Large enough to absorb bursts without
/// meaningful back-pressure on dispatchers.
const SHARD_BUFFER: usize = 256;

/// Engine configuration, as handed down by the application bootstrap.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding one `edis-<index>` store per shard.
    pub data_dir: PathBuf,
    /// Number of independent databases (shards).
    pub databases: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            databases: 16,
        }
    }
}

/// Handles to all shard actors, addressed by database index.
///
/// `Clone` is cheap — the handles are mpsc senders.
#[derive(Debug, Clone)]
pub struct Engine {
    shards: Vec<ShardHandle>,
}

impl Engine {
    /// Opens (or creates) every shard store on disk and spawns the actors.
    pub fn open(config: EngineConfig, notifier: Arc<dyn Notifier>) -> Result<Self, StoreError> {
        assert!(config.databases > 0, "database count must be at least 1");

        let router = Router::new();
        let mut shards = Vec::with_capacity(config.databases);
        for index in 0..config.databases {
            let path = config.data_dir.join(format!("edis-{index}"));
            let store = DiskStore::open(&path, true)?;
            shards.push(spawn_shard(
                index,
                store,
                notifier.clone(),
                router.clone(),
                SHARD_BUFFER,
            ));
        }
        router.install(shards.clone());

        info!(
            databases = config.databases,
            data_dir = %config.data_dir.display(),
            "engine up"
        );
        Ok(Self { shards })
    }

    /// An all-in-memory engine. Used by tests and ephemeral deployments.
    pub fn in_memory(databases: usize, notifier: Arc<dyn Notifier>) -> Self {
        assert!(databases > 0, "database count must be at least 1");

        let router = Router::new();
        let shards: Vec<ShardHandle> = (0..databases)
            .map(|index| {
                spawn_shard(
                    index,
                    MemoryStore::new(),
                    notifier.clone(),
                    router.clone(),
                    SHARD_BUFFER,
                )
            })
            .collect();
        router.install(shards.clone());
        Self { shards }
    }

    /// The handle for one database index.
    pub fn db(&self, index: usize) -> Option<&ShardHandle> {
        self.shards.get(index)
    }

    /// Number of databases.
    pub fn databases(&self) -> usize {
        self.shards.len()
    }
}
