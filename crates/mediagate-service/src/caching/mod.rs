//! # Local copies of remote objects
//!
//! Media is never streamed from the object store to clients directly. Instead, every requested
//! object is first downloaded into the cache directory, and served from there with full support
//! for range requests.
//!
//! The [`FetchCache`] keeps an in-memory index of all keys it has seen. Each key is in one of
//! three states:
//!
//! - *Pending*: a download is in progress. Further requests for the key wait for that download
//!   instead of starting their own.
//! - *Ready*: the object is available as a local file.
//! - *Failed*: the store reported an error for the key. Requests fail right away, until the
//!   entry expires or is invalidated.
//!
//! ## Directory layout
//!
//! - `<cache_dir>/objects/<key>`: downloaded objects, one file per key. Keys containing `/` map
//!   to nested directories.
//! - `<cache_dir>/tmp/`: downloads in progress. They are renamed into `objects/` once complete,
//!   which means a file in `objects/` is always complete. This directory is emptied on startup.
//!
//! ### Metrics
//!
//! - `fetch_cache.hit`: Requests served from a downloaded file.
//! - `fetch_cache.join`: Requests that waited for a download already in progress.
//! - `fetch_cache.miss`: Requests that started a download.
//! - `fetch_cache.failure.hit`: Requests answered with a remembered failure.
//! - `fetch_cache.file.reconciled`: Downloads skipped since the file was left by a previous run.
//! - `fetch_cache.download`: Duration of downloads, tagged by `status`.
//! - `fetch_cache.file.size`: A histogram of the size of downloaded objects.

mod cache_error;
mod cache_key;
mod fetch_cache;

pub use cache_error::FetchError;
pub use cache_key::{InvalidKey, MAX_KEY_LEN, ObjectKey};
pub use fetch_cache::{CachedObject, FetchCache, FetchCacheConfig};
