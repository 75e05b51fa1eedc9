use std::time::Duration;

use thiserror::Error;

use super::cache_key::InvalidKey;
use crate::store::StoreError;

/// An error that happens when resolving an object through the [`FetchCache`](super::FetchCache).
///
/// Remote failures are remembered by the cache, see [`is_remote_failure`](Self::is_remote_failure).
/// Local failures are not, so the next request tries again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The key cannot be mapped to a local file. No I/O was done.
    #[error("invalid key: {0}")]
    InvalidKey(InvalidKey),
    /// The object was not found in the store.
    #[error("not found")]
    NotFound,
    /// The object could not be fetched due to missing permissions.
    ///
    /// The attached string contains the store's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The object could not be fetched due to a timeout.
    #[error("download timed out after {0:?}")]
    Timeout(Duration),
    /// The object could not be fetched due to another problem,
    /// like connection loss, DNS resolution, or a 5xx response.
    #[error("download failed: {0}")]
    DownloadError(String),
    /// The object was fetched, but could not be written to the cache directory.
    #[error("storage failed: {0}")]
    StorageError(String),
    /// The download task went away without reporting a result.
    #[error("internal error")]
    InternalError,
}

impl FetchError {
    /// Whether this error originates from the store, rather than from the local machine.
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::PermissionDenied(_) | Self::Timeout(_) | Self::DownloadError(_)
        )
    }

    #[track_caller]
    pub(crate) fn storage(err: std::io::Error) -> Self {
        let dynerr: &dyn std::error::Error = &err; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr, "Failed to write to the cache directory");
        Self::StorageError(err.to_string())
    }
}

impl From<StoreError> for FetchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            StoreError::PermissionDenied(details) => Self::PermissionDenied(details),
            StoreError::Unavailable(details) => Self::DownloadError(details),
        }
    }
}

impl From<InvalidKey> for FetchError {
    fn from(err: InvalidKey) -> Self {
        Self::InvalidKey(err)
    }
}
