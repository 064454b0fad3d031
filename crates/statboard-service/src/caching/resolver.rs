use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::Shared;
use parking_lot::Mutex;

use crate::metric;
use crate::utils::CallOnDrop;

use super::error::{CacheContents, CacheError};
use super::fs::SnapshotStore;
use super::identifier::Identifier;
use super::record::SnapshotRecord;

type RegenerationChannel = Shared<oneshot::Receiver<CacheContents<SnapshotRecord>>>;
type PendingMap = Arc<Mutex<BTreeMap<Identifier, RegenerationChannel>>>;

/// Current time in epoch milliseconds.
pub(super) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The coalescing engine between the web-facing request path and the slow producers.
///
/// Given an identifier, an optional "caller already has a version newer than T" timestamp
/// and a producer, [`resolve`](Self::resolve) decides whether to serve a stored snapshot or
/// to schedule/await a regeneration, while guaranteeing at most one in-flight regeneration
/// per identifier no matter how many callers ask concurrently.
pub struct Resolver<S> {
    store: Arc<S>,

    /// Used for deduplicating concurrent regenerations.
    ///
    /// At most one entry per identifier; entries are removed the instant the regeneration
    /// completes, success or failure.
    pending: PendingMap,

    /// Timestamp of the most recent completed regeneration per identifier, used only for
    /// the staleness gate, never for correctness.
    last_triggered: Arc<Mutex<HashMap<Identifier, u64>>>,

    /// Minimum gap between `last_triggered` and a caller's `newer_than` before a new
    /// regeneration is triggered.
    staleness_threshold: Duration,
}

impl<S> Clone for Resolver<S> {
    fn clone(&self) -> Self {
        Resolver {
            store: Arc::clone(&self.store),
            pending: Arc::clone(&self.pending),
            last_triggered: Arc::clone(&self.last_triggered),
            staleness_threshold: self.staleness_threshold,
        }
    }
}

impl<S: SnapshotStore + 'static> Resolver<S> {
    pub fn new(store: Arc<S>, staleness_threshold: Duration) -> Self {
        Resolver {
            store,
            pending: Arc::new(Mutex::new(BTreeMap::new())),
            last_triggered: Arc::new(Mutex::new(HashMap::new())),
            staleness_threshold,
        }
    }

    /// Resolves the snapshot for `identifier`.
    ///
    /// With `newer_than` given, a stored generation at or after that timestamp is returned
    /// directly. Otherwise a regeneration is scheduled (subject to the staleness gate and
    /// coalesced with any in-flight one), and an older stored generation is returned
    /// immediately when one exists. Only a cold identifier, with nothing stored at all,
    /// blocks until the regeneration completes; this is also the only path on which a
    /// producer error reaches the caller.
    ///
    /// Without `newer_than`, a regeneration is always scheduled and the latest stored
    /// generation is served in the meantime.
    pub async fn resolve<F, Fut>(
        &self,
        identifier: Identifier,
        producer: F,
        newer_than: Option<u64>,
    ) -> CacheContents<SnapshotRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheContents<String>> + Send + 'static,
    {
        self.resolve_inner(identifier, producer, newer_than, None)
            .await
    }

    /// Like [`resolve`](Self::resolve), but bounds the cold-path wait.
    ///
    /// Cancelling the wait does not cancel the regeneration; other callers may still be
    /// relying on it, and its result is persisted as usual.
    pub async fn resolve_with_timeout<F, Fut>(
        &self,
        identifier: Identifier,
        producer: F,
        newer_than: Option<u64>,
        wait: Duration,
    ) -> CacheContents<SnapshotRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheContents<String>> + Send + 'static,
    {
        self.resolve_inner(identifier, producer, newer_than, Some(wait))
            .await
    }

    /// Forgets the staleness gate for `identifier` so the next `resolve` triggers a fresh
    /// regeneration, e.g. after gameplay events made the snapshot known-stale.
    pub fn invalidate(&self, identifier: &Identifier) {
        self.last_triggered.lock().remove(identifier);
    }

    async fn resolve_inner<F, Fut>(
        &self,
        identifier: Identifier,
        producer: F,
        newer_than: Option<u64>,
        wait: Option<Duration>,
    ) -> CacheContents<SnapshotRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheContents<String>> + Send + 'static,
    {
        metric!(counter("caches.snapshots.access") += 1);

        let Some(newer_than) = newer_than else {
            // unconditional refresh: always kick off a regeneration, serve the latest
            // stored generation in the meantime when there is one
            let channel = self.spawn_regeneration(identifier.clone(), producer);
            if let Some(latest) = self.store.latest_timestamp(&identifier)
                && let Some(record) = self.store.fetch_exact(&identifier, latest)
            {
                return Ok(record);
            }
            return await_channel(channel, wait).await;
        };

        // the common "client already has the newest" fast path
        if let Some(record) = self.store.fetch_exact(&identifier, newer_than) {
            return Ok(record);
        }
        if let Some(record) = self.store.fetch_after(&identifier, newer_than) {
            return Ok(record);
        }

        let stale = self.store.fetch_before(&identifier, newer_than);

        // Trigger a regeneration only if the last one is old enough, so many clients
        // polling in quick succession do not hammer the producer. A cold identifier always
        // triggers, since there is nothing to serve otherwise.
        let last = self
            .last_triggered
            .lock()
            .get(&identifier)
            .copied()
            .unwrap_or(0);
        let threshold = self.staleness_threshold.as_millis() as u64;
        let should_trigger = stale.is_none() || last < newer_than.saturating_sub(threshold);

        let channel = if should_trigger {
            Some(self.spawn_regeneration(identifier.clone(), producer))
        } else {
            self.pending.lock().get(&identifier).cloned()
        };

        if let Some(record) = stale {
            // non-blocking: the regeneration, if any, proceeds in the background
            metric!(counter("caches.snapshots.stale_served") += 1);
            return Ok(record);
        }

        match channel {
            Some(channel) => await_channel(channel, wait).await,
            // a cold identifier always triggered above
            None => Err(CacheError::NotFound),
        }
    }

    /// Spawns the regeneration as a separate task, deduplicated per identifier.
    ///
    /// NOTE: This function itself is *not* `async`, because it should eagerly spawn the
    /// producer on the runtime even if the caller never awaits the channel.
    fn spawn_regeneration<F, Fut>(&self, identifier: Identifier, producer: F) -> RegenerationChannel
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheContents<String>> + Send + 'static,
    {
        let mut pending = self.pending.lock();
        if let Some(channel) = pending.get(&identifier) {
            // a concurrent regeneration was deduplicated
            metric!(counter("caches.snapshots.channel.hit") += 1);
            return channel.clone();
        }
        metric!(counter("caches.snapshots.channel.miss") += 1);

        let (sender, receiver) = oneshot::channel();

        let pending_map = Arc::clone(&self.pending);
        let guard_id = identifier.clone();
        let remove_pending_token = CallOnDrop::new(move || {
            pending_map.lock().remove(&guard_id);
        });

        let store = Arc::clone(&self.store);
        let last_triggered = Arc::clone(&self.last_triggered);
        let id = identifier.clone();
        let computation = producer();

        let task = async move {
            let result = match computation.await {
                Ok(payload) => {
                    let generated_at = now_ms();
                    let record = store.store(&id, &payload, generated_at);
                    last_triggered.lock().insert(id.clone(), generated_at);
                    Ok(record)
                }
                Err(error) => {
                    tracing::warn!(identifier = %id, %error, "Snapshot regeneration failed");
                    Err(error)
                }
            };
            // Drop the token first to evict from the map. This ensures that callers either
            // get a channel that will receive data, or they create a new channel.
            drop(remove_pending_token);
            sender.send(result).ok();
        };
        tokio::spawn(task);

        let channel = receiver.shared();
        pending.insert(identifier, channel.clone());
        channel
    }
}

async fn await_channel(
    channel: RegenerationChannel,
    wait: Option<Duration>,
) -> CacheContents<SnapshotRecord> {
    let result = channel.map(|received| match received {
        Ok(contents) => contents,
        Err(_cancelled) => Err(CacheError::InternalError),
    });
    match wait {
        Some(limit) => tokio::time::timeout(limit, result)
            .await
            .unwrap_or(Err(CacheError::Timeout(limit))),
        None => result.await,
    }
}
