use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::metric;

use super::identifier::{DataKind, Identifier, identifier_has_kind};
use super::record::{SnapshotRecord, normalize_payload};

/// Read/write surface of a snapshot store.
///
/// Implemented by the durable [`FileStore`] and by the [`MemoryShim`](super::MemoryShim)
/// wrapping it, so the resolver does not care which tier it talks to.
pub trait SnapshotStore: Send + Sync {
    /// Persists a new snapshot generation and returns the stored record.
    ///
    /// The payload's embedded timestamp is normalized before persisting. Storing a newer
    /// generation removes all strictly older generations of the same identifier, unless the
    /// identifier belongs to a kind on the prune exempt list. Write failures are logged and
    /// dropped; the returned record is valid either way.
    fn store(&self, identifier: &Identifier, payload: &str, timestamp: u64) -> SnapshotRecord;

    /// Fetches the snapshot generated at exactly `timestamp`.
    fn fetch_exact(&self, identifier: &Identifier, timestamp: u64) -> Option<SnapshotRecord>;

    /// Fetches the newest snapshot generated strictly before `timestamp`.
    fn fetch_before(&self, identifier: &Identifier, timestamp: u64) -> Option<SnapshotRecord>;

    /// Fetches the newest snapshot generated strictly after `timestamp`.
    fn fetch_after(&self, identifier: &Identifier, timestamp: u64) -> Option<SnapshotRecord>;

    /// The generation timestamp of the newest stored snapshot, if any.
    fn latest_timestamp(&self, identifier: &Identifier) -> Option<u64>;

    /// Deletes all generations of `identifier` strictly older than `timestamp`, returning
    /// the number of removed entries.
    fn prune_older_than(&self, identifier: &Identifier, timestamp: u64) -> usize;

    /// Deletes all snapshots of the given kind strictly older than `timestamp`.
    fn prune_kind_older_than(&self, kind: DataKind, timestamp: u64) -> usize;

    /// Deletes all snapshots strictly older than `timestamp`, skipping identifiers of the
    /// exempt kinds. Used by the cleanup task so the query family can have its own
    /// retention window.
    fn prune_older_than_except(&self, timestamp: u64, exempt: &[DataKind]) -> usize;
}

/// The durable, file-backed snapshot store.
///
/// One file per (identifier, timestamp) pair, named `<identifier>-<timestamp>.json` in a
/// flat directory. Lookups scan the directory, which is O(number of files); the pruning
/// performed on store and by the cleanup task keeps the directory small. A readers-writer
/// lock guards all mutation, so a reader never observes a half-written file.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    /// Kinds whose older generations survive a newer store; they are pruned on their own
    /// schedule by the cleanup task instead.
    prune_exempt: Vec<DataKind>,
    lock: RwLock<()>,
}

impl FileStore {
    /// Opens the store at `dir`, creating the directory if needed.
    pub fn new(dir: PathBuf, prune_exempt: Vec<DataKind>) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(FileStore {
            dir,
            prune_exempt,
            lock: RwLock::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, identifier: &Identifier, timestamp: u64) -> PathBuf {
        self.dir.join(format!("{identifier}-{timestamp}.json"))
    }

    /// Lists all `(identifier, timestamp, path)` triples in the store directory.
    ///
    /// Files without a `.json` extension are skipped silently; `.json` files whose name
    /// does not parse are skipped with a warning. The caller must hold the lock.
    fn scan(&self) -> Vec<(String, u64, PathBuf)> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(
                    dir = %self.dir.display(),
                    %error,
                    "Failed to list snapshot store directory"
                );
                return Vec::new();
            }
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(".json") {
                continue;
            }
            match parse_file_name(name) {
                Some((identifier, timestamp)) => {
                    found.push((identifier.to_owned(), timestamp, entry.path()))
                }
                None => {
                    tracing::warn!(file = name, "Skipping snapshot file with malformed name");
                }
            }
        }
        found
    }

    /// All generation timestamps stored for `identifier`. The caller must hold the lock.
    fn timestamps_for(&self, identifier: &Identifier) -> Vec<u64> {
        self.scan()
            .into_iter()
            .filter(|(id, _, _)| id == identifier.as_str())
            .map(|(_, timestamp, _)| timestamp)
            .collect()
    }

    /// Reads one record off disk. I/O failures degrade to a miss. The caller must hold the
    /// lock.
    fn read_record(&self, identifier: &Identifier, timestamp: u64) -> Option<SnapshotRecord> {
        let path = self.file_path(identifier, timestamp);
        match fs::read_to_string(&path) {
            Ok(payload) => Some(SnapshotRecord {
                identifier: identifier.clone(),
                payload,
                generated_at: timestamp,
            }),
            Err(error) if error.kind() == io::ErrorKind::NotFound => None,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "Failed to read snapshot file");
                None
            }
        }
    }

    /// Removes files selected by `matches`, returning how many were removed. The caller
    /// must hold the write lock.
    fn remove_matching(&self, matches: impl Fn(&str, u64) -> bool) -> usize {
        let mut removed = 0;
        for (identifier, timestamp, path) in self.scan() {
            if !matches(&identifier, timestamp) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "Failed to remove snapshot file");
                }
            }
        }
        removed
    }
}

impl SnapshotStore for FileStore {
    fn store(&self, identifier: &Identifier, payload: &str, timestamp: u64) -> SnapshotRecord {
        let payload = normalize_payload(payload, timestamp);
        let path = self.file_path(identifier, timestamp);

        let _guard = self.lock.write();
        if let Err(error) = write_atomically(&self.dir, &path, payload.as_bytes()) {
            tracing::warn!(path = %path.display(), %error, "Failed to write snapshot file");
        } else {
            metric!(counter("caches.snapshots.file.write") += 1);
        }

        let exempt = self.prune_exempt.iter().any(|kind| identifier.has_kind(*kind));
        if !exempt {
            self.remove_matching(|id, ts| id == identifier.as_str() && ts < timestamp);
        }

        SnapshotRecord {
            identifier: identifier.clone(),
            payload,
            generated_at: timestamp,
        }
    }

    fn fetch_exact(&self, identifier: &Identifier, timestamp: u64) -> Option<SnapshotRecord> {
        let _guard = self.lock.read();
        let record = self.read_record(identifier, timestamp);
        if record.is_some() {
            metric!(counter("caches.snapshots.file.hit") += 1);
        } else {
            metric!(counter("caches.snapshots.file.miss") += 1);
        }
        record
    }

    fn fetch_before(&self, identifier: &Identifier, timestamp: u64) -> Option<SnapshotRecord> {
        let _guard = self.lock.read();
        let found = self
            .timestamps_for(identifier)
            .into_iter()
            .filter(|ts| *ts < timestamp)
            .max()?;
        self.read_record(identifier, found)
    }

    fn fetch_after(&self, identifier: &Identifier, timestamp: u64) -> Option<SnapshotRecord> {
        let _guard = self.lock.read();
        let found = self
            .timestamps_for(identifier)
            .into_iter()
            .filter(|ts| *ts > timestamp)
            .max()?;
        self.read_record(identifier, found)
    }

    fn latest_timestamp(&self, identifier: &Identifier) -> Option<u64> {
        let _guard = self.lock.read();
        self.timestamps_for(identifier).into_iter().max()
    }

    fn prune_older_than(&self, identifier: &Identifier, timestamp: u64) -> usize {
        let _guard = self.lock.write();
        self.remove_matching(|id, ts| id == identifier.as_str() && ts < timestamp)
    }

    fn prune_kind_older_than(&self, kind: DataKind, timestamp: u64) -> usize {
        let _guard = self.lock.write();
        self.remove_matching(|id, ts| identifier_has_kind(id, kind) && ts < timestamp)
    }

    fn prune_older_than_except(&self, timestamp: u64, exempt: &[DataKind]) -> usize {
        let _guard = self.lock.write();
        self.remove_matching(|id, ts| {
            ts < timestamp && !exempt.iter().any(|kind| identifier_has_kind(id, *kind))
        })
    }
}

/// Splits `<identifier>-<timestamp>.json` back into its parts.
///
/// The timestamp is the final dash-separated, all-digit segment; identifiers may contain
/// dashes themselves (server uuids, query hashes).
fn parse_file_name(name: &str) -> Option<(&str, u64)> {
    let stem = name.strip_suffix(".json")?;
    let (identifier, timestamp) = stem.rsplit_once('-')?;
    if identifier.is_empty() || timestamp.is_empty() {
        return None;
    }
    if !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((identifier, timestamp.parse().ok()?))
}

/// Writes through a tempfile in the same directory so a concurrent reader never observes a
/// partial file.
fn write_atomically(dir: &Path, path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut temp_file = tempfile::Builder::new().prefix("tmp").tempfile_in(dir)?;
    temp_file.write_all(contents)?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use serde_json::Value;
    use uuid::Uuid;

    use super::*;

    fn store_in(dir: &Path) -> FileStore {
        FileStore::new(dir.to_path_buf(), vec![DataKind::Query]).unwrap()
    }

    #[test]
    fn test_store_dir_created() {
        let basedir = statboard_test::tempdir();
        let dir = basedir.path().join("snapshots");
        let _store = store_in(&dir);
        assert!(dir.is_dir());
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(parse_file_name("players-1000.json"), Some(("players", 1000)));
        assert_eq!(
            parse_file_name("sessions-a-b-c-1000.json"),
            Some(("sessions-a-b-c", 1000))
        );
        assert_eq!(parse_file_name("players-1000.txt"), None);
        assert_eq!(parse_file_name("players.json"), None);
        assert_eq!(parse_file_name("players-12x4.json"), None);
        assert_eq!(parse_file_name("-1000.json"), None);
    }

    #[test]
    fn test_fetch_predicates_and_boundaries() {
        let basedir = statboard_test::tempdir();
        let store = store_in(basedir.path());
        let id = DataKind::Sessions.with_discriminator("srv1");

        store.store(&id, r#"{"a":1}"#, 1000);

        assert!(store.fetch_after(&id, 500).is_some());
        assert!(store.fetch_after(&id, 1000).is_none());
        assert!(store.fetch_before(&id, 1000).is_none());
        assert!(store.fetch_exact(&id, 1000).is_some());

        // strictly-older: the boundary entry survives
        store.prune_older_than(&id, 1000);
        assert!(store.fetch_exact(&id, 1000).is_some());
    }

    #[test]
    fn test_fetch_before_returns_newest_older() {
        let basedir = statboard_test::tempdir();
        let store = store_in(basedir.path());
        let id = DataKind::Query.with_discriminator("abc");

        store.store(&id, "{}", 100);
        store.store(&id, "{}", 200);
        store.store(&id, "{}", 300);

        assert_eq!(store.fetch_before(&id, 250).unwrap().generated_at, 200);
        assert_eq!(store.fetch_after(&id, 150).unwrap().generated_at, 300);
        assert_eq!(store.latest_timestamp(&id), Some(300));
    }

    #[test]
    fn test_store_prunes_older_generations() {
        let basedir = statboard_test::tempdir();
        let store = store_in(basedir.path());
        let id = DataKind::Players.global();

        store.store(&id, r#"{"v":1}"#, 1000);
        store.store(&id, r#"{"v":2}"#, 2000);

        assert!(store.fetch_exact(&id, 1000).is_none());
        assert!(store.fetch_exact(&id, 2000).is_some());
    }

    #[test]
    fn test_exempt_kind_keeps_older_generations() {
        let basedir = statboard_test::tempdir();
        let store = store_in(basedir.path());
        let id = DataKind::Query.with_discriminator("deadbeef");

        store.store(&id, r#"{"v":1}"#, 1000);
        store.store(&id, r#"{"v":2}"#, 2000);

        assert!(store.fetch_exact(&id, 1000).is_some());
        assert!(store.fetch_exact(&id, 2000).is_some());
    }

    #[test]
    fn test_timestamp_injection_round_trip() {
        let basedir = statboard_test::tempdir();
        let store = store_in(basedir.path());
        let id = DataKind::ServerOverview.for_server(Uuid::new_v4());

        store.store(&id, r#"{"a":1}"#, 1234);

        let record = store.fetch_exact(&id, 1234).unwrap();
        let value: Value = serde_json::from_str(&record.payload).unwrap();
        assert_eq!(value["timestamp"], 1234);
        assert!(value["timestamp_f"].is_string());
    }

    #[test]
    fn test_idempotent_refetch() {
        let basedir = statboard_test::tempdir();
        let store = store_in(basedir.path());
        let id = DataKind::Kills.global();

        store.store(&id, r#"{"kills":[]}"#, 77);

        let first = store.fetch_exact(&id, 77).unwrap();
        let second = store.fetch_exact(&id, 77).unwrap();
        assert_eq!(first.payload, second.payload);
    }

    #[test]
    fn test_malformed_file_names_are_skipped() {
        let basedir = statboard_test::tempdir();
        let store = store_in(basedir.path());
        let id = DataKind::Players.global();

        File::create(basedir.path().join("players-oops.json")).unwrap();
        File::create(basedir.path().join("notes.txt")).unwrap();
        store.store(&id, "{}", 50);

        assert_eq!(store.latest_timestamp(&id), Some(50));
        assert_eq!(store.prune_older_than(&id, u64::MAX), 1);
        // the unparsable file is left alone
        assert!(basedir.path().join("players-oops.json").exists());
    }

    #[test]
    fn test_prune_except_skips_exempt_kinds() {
        let basedir = statboard_test::tempdir();
        let store = store_in(basedir.path());
        let query = DataKind::Query.with_discriminator("aa11");
        let players = DataKind::Players.global();

        store.store(&query, "{}", 10);
        store.store(&players, "{}", 10);

        let removed = store.prune_older_than_except(100, &[DataKind::Query]);
        assert_eq!(removed, 1);
        assert!(store.fetch_exact(&query, 10).is_some());
        assert!(store.fetch_exact(&players, 10).is_none());
    }

    #[test]
    fn test_prune_kind_matches_discriminated_identifiers() {
        let basedir = statboard_test::tempdir();
        let store = store_in(basedir.path());
        let a = DataKind::Query.with_discriminator("aa11");
        let b = DataKind::Query.with_discriminator("bb22");
        let players = DataKind::Players.global();

        store.store(&a, "{}", 10);
        store.store(&b, "{}", 20);
        store.store(&players, "{}", 10);

        let removed = store.prune_kind_older_than(DataKind::Query, 15);
        assert_eq!(removed, 1);
        assert!(store.fetch_exact(&a, 10).is_none());
        assert!(store.fetch_exact(&b, 20).is_some());
        assert!(store.fetch_exact(&players, 10).is_some());
    }
}
