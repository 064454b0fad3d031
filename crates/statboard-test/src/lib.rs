//! Helpers for testing the statboard service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. When dropped too early, this might silently leak the temp
//!    directory, since the snapshot store will create it again lazily after it has been
//!    deleted. To avoid this, assign it to a variable in the test function
//!    (e.g. `let _store_dir = test::tempdir()`).

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `statboard-service` crate and
///    mutes all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("statboard_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`into_path`](TempDir::into_path) is called. Use it as a guard to automatically clean up
/// after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}
