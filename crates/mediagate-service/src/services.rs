//! Provides the shared gateway services and a way to initialize them.
//!
//! [`MediaService`] ties the object store to the [`FetchCache`] and is the single entry point used
//! by the HTTP layer. It is created once at startup according to the provided [`Config`].
//!
//! Downloads run on a separate asynchronous runtime dedicated to I/O-intensive work.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::Handle;

use crate::caching::{CachedObject, FetchCache, FetchCacheConfig, FetchError};
use crate::config::Config;
use crate::selection::{self, EmptySelection};
use crate::store::{self, ObjectStore, StoreError};

/// Errors choosing a random object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PickError {
    /// The store could not be listed.
    #[error("failed to list objects: {0}")]
    List(#[from] StoreError),
    /// The store is empty.
    #[error(transparent)]
    Empty(#[from] EmptySelection),
}

#[derive(Clone, Debug)]
pub struct MediaService {
    store: Arc<dyn ObjectStore>,
    cache: FetchCache,
}

impl MediaService {
    /// Creates the configured store and the cache in front of it.
    pub async fn create(config: &Config, io_pool: Handle) -> Result<Self> {
        let store = store::create_store(config)
            .await
            .context("failed to create object store")?;
        let cache = FetchCache::new(FetchCacheConfig::from(config), store.clone(), io_pool)
            .context("failed to create cache directory")?;

        Ok(Self::new(store, cache))
    }

    pub fn new(store: Arc<dyn ObjectStore>, cache: FetchCache) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &FetchCache {
        &self.cache
    }

    /// Lists the store and picks one of its keys at random.
    pub async fn pick_random(&self) -> Result<String, PickError> {
        let keys = self.store.list().await?;
        tracing::trace!(count = keys.len(), "Choosing from listed keys");
        let key = selection::pick_random(&keys)?;
        Ok(key.to_owned())
    }

    /// Returns the local copy of the object stored under `key`.
    pub async fn resolve(&self, key: &str) -> Result<Arc<CachedObject>, FetchError> {
        self.cache.resolve(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test::{self, MockStore};

    fn service(store: &Arc<MockStore>, cache_dir: &test::TempDir) -> MediaService {
        let config = FetchCacheConfig {
            cache_dir: cache_dir.path().to_owned(),
            download_timeout: None,
            retry_failures_after: None,
        };
        let cache = FetchCache::new(config, store.clone(), Handle::current()).unwrap();
        MediaService::new(store.clone(), cache)
    }

    #[tokio::test]
    async fn test_pick_random() {
        test::setup();
        let cache_dir = test::tempdir();
        let store = Arc::new(
            MockStore::new()
                .with_object("a.mp3", "a")
                .with_object("b.mp3", "b"),
        );
        let service = service(&store, &cache_dir);

        let key = service.pick_random().await.unwrap();
        assert!(key == "a.mp3" || key == "b.mp3", "{key}");
        assert_eq!(store.list_calls(), 1);
        // choosing does not download anything
        assert_eq!(store.total_get_calls(), 0);
    }

    #[tokio::test]
    async fn test_pick_random_empty() {
        test::setup();
        let cache_dir = test::tempdir();
        let store = Arc::new(MockStore::new());
        let service = service(&store, &cache_dir);

        assert_eq!(
            service.pick_random().await,
            Err(PickError::Empty(EmptySelection))
        );
    }

    #[tokio::test]
    async fn test_pick_random_list_error() {
        test::setup();
        let cache_dir = test::tempdir();
        let error = StoreError::Unavailable("bucket on fire".into());
        let store = Arc::new(MockStore::new().with_list_error(error.clone()));
        let service = service(&store, &cache_dir);

        assert_eq!(service.pick_random().await, Err(PickError::List(error)));
    }
}
