use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::CacheConfigs;
use crate::metric;

use super::fs::SnapshotStore;
use super::identifier::DataKind;
use super::resolver::now_ms;

/// Periodically prunes snapshots that have outlived their retention window.
///
/// Two windows apply: query results are kept much longer than regular snapshots, since
/// players share links to them and expect those links to keep working for a while.
pub struct CleanupTask<S> {
    store: Arc<S>,
    interval: Duration,
    retention: Duration,
    query_retention: Duration,
}

impl<S: SnapshotStore + 'static> CleanupTask<S> {
    pub fn new(store: Arc<S>, config: &CacheConfigs) -> Self {
        CleanupTask {
            store,
            interval: config.cleanup_interval,
            retention: config.retention,
            query_retention: config.query_retention,
        }
    }

    /// Spawns the cleanup loop on the runtime.
    ///
    /// The first run is delayed by a random fraction of the interval so a fleet of
    /// instances restarting together does not prune in lockstep.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let interval_ms = self.interval.as_millis().max(1) as u64;
            let jitter = rand::thread_rng().gen_range(0..interval_ms);
            tokio::time::sleep(Duration::from_millis(jitter)).await;

            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.run_once();
            }
        })
    }

    /// One cleanup sweep over both retention windows.
    ///
    /// The windows are swept in random order, so a persistent problem with one family's
    /// files cannot starve the other sweep across restarts.
    pub fn run_once(&self) {
        let now = now_ms();
        let query_cutoff = now.saturating_sub(self.query_retention.as_millis() as u64);
        let cutoff = now.saturating_sub(self.retention.as_millis() as u64);

        let sweep_queries = || self.store.prune_kind_older_than(DataKind::Query, query_cutoff);
        let sweep_rest = || self.store.prune_older_than_except(cutoff, &[DataKind::Query]);

        let (removed_queries, removed) = if rand::thread_rng().r#gen() {
            let queries = sweep_queries();
            (queries, sweep_rest())
        } else {
            let rest = sweep_rest();
            (sweep_queries(), rest)
        };

        tracing::info!(removed, removed_queries, "Snapshot cleanup finished");
        metric!(counter("caches.snapshots.cleanup.removed") += removed as i64);
        metric!(counter("caches.snapshots.cleanup.removed_queries") += removed_queries as i64);
    }
}
