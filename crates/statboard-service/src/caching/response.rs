use std::sync::Arc;
use std::time::Duration;

use super::error::{CacheContents, CacheError};
use super::identifier::DataKind;

type Responses = moka::sync::Cache<String, Arc<String>>;

/// A short-TTL cache of fully rendered response bodies.
///
/// This sits in front of (or next to) the resolver for very hot, low-cardinality
/// identifiers: everyone gets the same bytes for a couple of minutes, with no
/// timestamp comparisons involved. The key space is independent of the snapshot store,
/// though it is usually populated with the same identifier strings.
#[derive(Clone)]
pub struct ResponseCache {
    cache: Responses,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        let cache = Responses::builder()
            .name("responses")
            .time_to_live(ttl)
            .support_invalidation_closures()
            .build();
        ResponseCache { cache }
    }

    /// Returns the cached body for `key`, computing and inserting it on a miss.
    ///
    /// Concurrent calls for the same key are coalesced; the supplier runs at most once per
    /// TTL window. A failing supplier is not cached.
    pub fn get_or_compute<F>(&self, key: &str, supplier: F) -> CacheContents<Arc<String>>
    where
        F: FnOnce() -> CacheContents<String>,
    {
        self.cache
            .try_get_with_by_ref(key, || supplier().map(Arc::new))
            .map_err(|error: Arc<CacheError>| (*error).clone())
    }

    /// Drops the cached body for exactly `key`.
    pub fn invalidate(&self, key: &str) {
        self.cache.invalidate(key);
    }

    /// Drops every cached body whose key starts with the given data-kind tag.
    pub fn invalidate_kind(&self, kind: DataKind) {
        let tag = kind.as_ref().to_owned();
        self.cache
            .invalidate_entries_if(move |key, _| key.starts_with(&tag))
            .ok();
    }
}
