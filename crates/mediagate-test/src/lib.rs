//! Helpers for testing the gateway and its services.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. When dropped too early, the cache directory is removed while
//!    the cache under test still points into it. To avoid this, assign it to a variable in the
//!    test function (e.g. `let cache_dir = test::tempdir()`).

use bytes::Bytes;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `mediagate` crates and mutes all
///    other logs (such as hyper or the AWS SDK).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("mediagate=trace,mediagate_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`keep`](TempDir::keep) is called. Use it as a guard to automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Returns `len` bytes of deterministic, non-repeating-looking content.
///
/// Every byte depends on its offset, so a wrong slice in a range response is always detected.
pub fn payload(len: usize) -> Bytes {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8)
        .collect::<Vec<_>>()
        .into()
}
