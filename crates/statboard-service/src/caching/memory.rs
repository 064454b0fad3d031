use std::time::Duration;

use crate::metric;

use super::fs::SnapshotStore;
use super::identifier::{DataKind, Identifier};
use super::record::SnapshotRecord;

type InMemoryCache = moka::sync::Cache<(Identifier, u64), SnapshotRecord>;

/// A time-bounded in-memory tier in front of a wrapped [`SnapshotStore`].
///
/// Point lookups are served from memory when possible and backfilled from the wrapped
/// store on a miss, so the shim is always a strict subset of the durable data. The
/// range predicates (`fetch_before`, `fetch_after`, `latest_timestamp`) always delegate:
/// the shim only ever holds a subset, so answering "newest before T" from memory could
/// contradict the wrapped store's answer.
///
/// Entries expire a fixed time after being written, not after last access.
pub struct MemoryShim<S> {
    inner: S,
    cache: InMemoryCache,
}

impl<S: SnapshotStore> MemoryShim<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        let cache = InMemoryCache::builder()
            .name("snapshots")
            .time_to_live(ttl)
            .support_invalidation_closures()
            .build();
        MemoryShim { inner, cache }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn backfill(&self, record: &SnapshotRecord) {
        self.cache.insert(
            (record.identifier.clone(), record.generated_at),
            record.clone(),
        );
    }
}

impl<S: SnapshotStore> SnapshotStore for MemoryShim<S> {
    fn store(&self, identifier: &Identifier, payload: &str, timestamp: u64) -> SnapshotRecord {
        let record = self.inner.store(identifier, payload, timestamp);
        // the wrapped store dropped its older generations, drop ours too
        let id = identifier.clone();
        self.cache
            .invalidate_entries_if(move |(key_id, key_ts), _| *key_id == id && *key_ts < timestamp)
            .ok();
        self.backfill(&record);
        record
    }

    fn fetch_exact(&self, identifier: &Identifier, timestamp: u64) -> Option<SnapshotRecord> {
        if let Some(record) = self.cache.get(&(identifier.clone(), timestamp)) {
            metric!(counter("caches.snapshots.memory.hit") += 1);
            return Some(record);
        }
        let record = self.inner.fetch_exact(identifier, timestamp)?;
        self.backfill(&record);
        Some(record)
    }

    fn fetch_before(&self, identifier: &Identifier, timestamp: u64) -> Option<SnapshotRecord> {
        let record = self.inner.fetch_before(identifier, timestamp)?;
        self.backfill(&record);
        Some(record)
    }

    fn fetch_after(&self, identifier: &Identifier, timestamp: u64) -> Option<SnapshotRecord> {
        let record = self.inner.fetch_after(identifier, timestamp)?;
        self.backfill(&record);
        Some(record)
    }

    fn latest_timestamp(&self, identifier: &Identifier) -> Option<u64> {
        self.inner.latest_timestamp(identifier)
    }

    fn prune_older_than(&self, identifier: &Identifier, timestamp: u64) -> usize {
        let id = identifier.clone();
        self.cache
            .invalidate_entries_if(move |(key_id, key_ts), _| *key_id == id && *key_ts < timestamp)
            .ok();
        self.inner.prune_older_than(identifier, timestamp)
    }

    fn prune_kind_older_than(&self, kind: DataKind, timestamp: u64) -> usize {
        self.cache
            .invalidate_entries_if(move |(key_id, key_ts), _| {
                key_id.has_kind(kind) && *key_ts < timestamp
            })
            .ok();
        self.inner.prune_kind_older_than(kind, timestamp)
    }

    fn prune_older_than_except(&self, timestamp: u64, exempt: &[DataKind]) -> usize {
        let exempt_kinds = exempt.to_vec();
        self.cache
            .invalidate_entries_if(move |(key_id, key_ts), _| {
                *key_ts < timestamp && !exempt_kinds.iter().any(|kind| key_id.has_kind(*kind))
            })
            .ok();
        self.inner.prune_older_than_except(timestamp, exempt)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::super::fs::FileStore;
    use super::*;

    /// Counts fetches that fall through to the wrapped store.
    struct CountingStore {
        inner: FileStore,
        exact_fetches: Mutex<usize>,
    }

    impl SnapshotStore for CountingStore {
        fn store(&self, identifier: &Identifier, payload: &str, timestamp: u64) -> SnapshotRecord {
            self.inner.store(identifier, payload, timestamp)
        }

        fn fetch_exact(&self, identifier: &Identifier, timestamp: u64) -> Option<SnapshotRecord> {
            *self.exact_fetches.lock().unwrap() += 1;
            self.inner.fetch_exact(identifier, timestamp)
        }

        fn fetch_before(&self, identifier: &Identifier, timestamp: u64) -> Option<SnapshotRecord> {
            self.inner.fetch_before(identifier, timestamp)
        }

        fn fetch_after(&self, identifier: &Identifier, timestamp: u64) -> Option<SnapshotRecord> {
            self.inner.fetch_after(identifier, timestamp)
        }

        fn latest_timestamp(&self, identifier: &Identifier) -> Option<u64> {
            self.inner.latest_timestamp(identifier)
        }

        fn prune_older_than(&self, identifier: &Identifier, timestamp: u64) -> usize {
            self.inner.prune_older_than(identifier, timestamp)
        }

        fn prune_kind_older_than(&self, kind: DataKind, timestamp: u64) -> usize {
            self.inner.prune_kind_older_than(kind, timestamp)
        }

        fn prune_older_than_except(&self, timestamp: u64, exempt: &[DataKind]) -> usize {
            self.inner.prune_older_than_except(timestamp, exempt)
        }
    }

    fn shim_in(dir: &std::path::Path, ttl: Duration) -> MemoryShim<CountingStore> {
        let inner = CountingStore {
            inner: FileStore::new(dir.to_path_buf(), vec![DataKind::Query]).unwrap(),
            exact_fetches: Mutex::new(0),
        };
        MemoryShim::new(inner, ttl)
    }

    #[test]
    fn test_backfill_serves_from_memory() {
        statboard_test::setup();
        let basedir = statboard_test::tempdir();
        let shim = shim_in(basedir.path(), Duration::from_secs(60));
        let id = DataKind::Players.global();

        // stored through the shim, so already mirrored in memory
        shim.store(&id, "{}", 100);
        assert!(shim.fetch_exact(&id, 100).is_some());
        assert_eq!(*shim.inner().exact_fetches.lock().unwrap(), 0);
    }

    #[test]
    fn test_miss_falls_through_and_backfills() {
        statboard_test::setup();
        let basedir = statboard_test::tempdir();
        let shim = shim_in(basedir.path(), Duration::from_secs(60));
        let id = DataKind::Players.global();

        // write behind the shim's back
        shim.inner().store(&id, "{}", 100);

        assert!(shim.fetch_exact(&id, 100).is_some());
        assert_eq!(*shim.inner().exact_fetches.lock().unwrap(), 1);

        // backfilled now, the second fetch stays in memory
        assert!(shim.fetch_exact(&id, 100).is_some());
        assert_eq!(*shim.inner().exact_fetches.lock().unwrap(), 1);
    }

    #[test]
    fn test_prune_invalidates_memory() {
        statboard_test::setup();
        let basedir = statboard_test::tempdir();
        let shim = shim_in(basedir.path(), Duration::from_secs(60));
        let id = DataKind::Query.with_discriminator("ff00");

        shim.store(&id, "{}", 100);
        shim.store(&id, "{}", 200);
        shim.prune_older_than(&id, 200);

        assert!(shim.fetch_exact(&id, 100).is_none());
        assert!(shim.fetch_exact(&id, 200).is_some());
    }

    #[test]
    fn test_ttl_expires_but_durable_data_survives() {
        statboard_test::setup();
        let basedir = statboard_test::tempdir();
        let shim = shim_in(basedir.path(), Duration::from_millis(50));
        let id = DataKind::Sessions.global();

        shim.store(&id, "{}", 100);
        std::thread::sleep(Duration::from_millis(80));

        // memory entry expired, the fetch falls through to disk
        assert!(shim.fetch_exact(&id, 100).is_some());
        assert_eq!(*shim.inner().exact_fetches.lock().unwrap(), 1);
    }
}
