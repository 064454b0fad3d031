use std::time::Duration;

use thiserror::Error;

/// An error that happens while resolving or regenerating a snapshot.
///
/// A cache is best-effort: storage I/O failures degrade to misses and are never surfaced
/// through this type. What callers can observe is a failed producer (only on the cold path,
/// where there is no stale data to fall back to), a bounded wait running out, or an
/// unexpected internal error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// No snapshot exists for the identifier.
    ///
    /// This is internal bookkeeping; the resolver never returns it to a caller.
    #[error("not found")]
    NotFound,
    /// A stored payload or filename could not be parsed.
    #[error("malformed: {0}")]
    Malformed(String),
    /// The caller-supplied bound on the cold-path wait ran out.
    ///
    /// The underlying regeneration keeps running; other callers may still receive its
    /// result.
    #[error("timed out waiting for snapshot regeneration")]
    Timeout(Duration),
    /// The producer function failed while regenerating a snapshot.
    ///
    /// The attached string is the producer's error message.
    #[error("producer failed: {0}")]
    Producer(String),
    /// An unexpected error in the caching engine itself.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl From<serde_json::Error> for CacheError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    #[track_caller]
    pub(crate) fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The result of a cache operation, containing either `Ok(T)` or the reason why a snapshot
/// could not be produced.
pub type CacheContents<T = ()> = Result<T, CacheError>;
