//! Snapshot caching for the dashboard.
//!
//! The dashboard serves pre-rendered JSON artifacts ("snapshots") that are expensive to
//! produce from gameplay data, so they are regenerated asynchronously and cached on
//! several layers:
//!
//! - The [`FileStore`] is the durable layer: one file per generation, named
//!   `<identifier>-<timestamp>.json`, surviving restarts.
//! - The [`MemoryShim`] wraps the file store and keeps recently touched records in memory
//!   for a short TTL.
//! - The [`Resolver`] sits on top of the store. It decides between serving a stored
//!   generation and scheduling a regeneration, coalescing concurrent regenerations of the
//!   same identifier into a single producer run and serving stale data while a refresh
//!   runs in the background.
//! - The [`ResponseCache`] is an independent fast path for fully rendered response bodies
//!   with a very short TTL.
//!
//! A [`CleanupTask`] periodically deletes snapshots that outlived their retention window,
//! with a separate, longer window for shared query results.

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;

mod cleanup;
mod error;
mod fs;
mod identifier;
mod memory;
mod record;
mod resolver;
mod response;

pub use cleanup::CleanupTask;
pub use error::{CacheContents, CacheError};
pub use fs::{FileStore, SnapshotStore};
pub use identifier::{DataKind, Identifier};
pub use memory::MemoryShim;
pub use record::SnapshotRecord;
pub use resolver::Resolver;
pub use response::ResponseCache;

/// The fully wired caching stack.
pub struct Stores {
    /// The tiered snapshot store: a memory shim over the durable file store.
    pub snapshots: Arc<MemoryShim<FileStore>>,
    /// The coalescing resolver on top of the snapshot store.
    pub resolver: Resolver<MemoryShim<FileStore>>,
    /// The fast path for fully rendered response bodies.
    pub responses: ResponseCache,
}

impl Stores {
    pub fn from_config(config: &Config) -> Result<Self> {
        let dir = config
            .cache_dir("snapshots")
            .ok_or_else(|| anyhow::anyhow!("no caching configured! Did you provide a cache_dir?"))?;

        let file_store = FileStore::new(dir, vec![DataKind::Query])?;
        let snapshots = Arc::new(MemoryShim::new(file_store, config.caches.memory_ttl));
        let resolver = Resolver::new(Arc::clone(&snapshots), config.caches.staleness_threshold);
        let responses = ResponseCache::new(config.caches.response_ttl);

        Ok(Stores {
            snapshots,
            resolver,
            responses,
        })
    }

    /// Spawns the background cleanup loop for the durable store.
    pub fn spawn_cleanup(&self, config: &Config) -> tokio::task::JoinHandle<()> {
        CleanupTask::new(Arc::clone(&self.snapshots), &config.caches).spawn()
    }
}
