//! Access to the object stores media files are drawn from.
//!
//! A store only knows how to enumerate its keys and how to produce the raw bytes of one object.
//! Persisting those bytes is the job of the [`FetchCache`](crate::caching::FetchCache).

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::{Config, StoreConfig};

mod filesystem;
mod s3;

pub use filesystem::FilesystemStore;
pub use s3::S3Store;

/// The body of a single object, yielded chunk by chunk.
pub type ObjectStream = BoxStream<'static, Result<Bytes, StoreError>>;

/// Errors returned by an [`ObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The object or the bucket does not exist.
    #[error("not found")]
    NotFound,
    /// The store rejected our credentials.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Any other failure talking to the store, including errors in the middle of a body.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn unavailable(err: &dyn std::error::Error) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(err) = source {
            message.push_str(": ");
            message.push_str(&err.to_string());
            source = err.source();
        }
        Self::Unavailable(message)
    }
}

/// A flat namespace of objects addressed by string keys.
pub trait ObjectStore: fmt::Debug + Send + Sync {
    /// Returns all keys in the store, in no particular order.
    fn list(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>>;

    /// Opens the full contents of the object stored under `key`.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<ObjectStream, StoreError>>;
}

/// Creates the store described by the configuration.
pub async fn create_store(config: &Config) -> anyhow::Result<Arc<dyn ObjectStore>> {
    Ok(match config.store {
        StoreConfig::S3(ref s3) => {
            let settings = s3.resolve()?;
            Arc::new(S3Store::new(settings).await)
        }
        StoreConfig::Filesystem(ref fs) => Arc::new(FilesystemStore::new(fs.path.clone())),
    })
}
