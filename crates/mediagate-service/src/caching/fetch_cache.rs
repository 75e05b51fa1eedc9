use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::Shared;
use futures::{FutureExt, StreamExt};
use sentry::{Hub, SentryFutureExt};
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::Instrument;

use super::{FetchError, ObjectKey};
use crate::config::Config;
use crate::store::ObjectStore;

/// Settings of a [`FetchCache`].
#[derive(Debug, Clone)]
pub struct FetchCacheConfig {
    /// Root directory. Objects are stored below `objects/`, partial downloads below `tmp/`.
    pub cache_dir: PathBuf,
    /// Upper bound for fetching a single object from the store.
    pub download_timeout: Option<Duration>,
    /// How long a failed fetch is remembered. Forever when `None`.
    pub retry_failures_after: Option<Duration>,
}

impl From<&Config> for FetchCacheConfig {
    fn from(config: &Config) -> Self {
        Self {
            cache_dir: config.cache_dir.clone(),
            download_timeout: config.download_timeout,
            retry_failures_after: config.retry_failures_after,
        }
    }
}

/// A completely downloaded object in the cache directory.
#[derive(Debug)]
pub struct CachedObject {
    key: ObjectKey,
    path: PathBuf,
    size: u64,
}

impl CachedObject {
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The size of the object in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Opens the cached file for reading.
    pub async fn open(&self) -> io::Result<File> {
        File::open(&self.path).await
    }
}

type DownloadResult = Result<Arc<CachedObject>, FetchError>;

/// The receiving end of a download, shared by everyone waiting for it.
type DownloadChannel = Shared<oneshot::Receiver<DownloadResult>>;

enum EntryState {
    Pending(DownloadChannel),
    Ready(Arc<CachedObject>),
    Failed { error: FetchError, since: Instant },
}

struct Inner {
    config: FetchCacheConfig,
    objects_dir: PathBuf,
    tmp_dir: PathBuf,
    store: Arc<dyn ObjectStore>,
    /// The runtime downloads are spawned on.
    runtime: Handle,
    entries: Mutex<BTreeMap<ObjectKey, EntryState>>,
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, BTreeMap<ObjectKey, EntryState>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, since: Instant) -> bool {
        self.config
            .retry_failures_after
            .is_some_and(|retry_after| since.elapsed() >= retry_after)
    }

    fn tempfile(&self) -> io::Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix("tmp")
            .tempfile_in(&self.tmp_dir)
    }
}

/// Materializes objects of an [`ObjectStore`] as local files, fetching every key at most once.
///
/// Concurrent requests for the same key share a single download. The download runs as its own
/// task on the I/O runtime, so it completes even when every requester goes away.
///
/// Successfully downloaded objects stay cached for the lifetime of the process. Failures reported
/// by the store are remembered as well, unless
/// [`retry_failures_after`](FetchCacheConfig::retry_failures_after) is configured. Failures writing
/// to the cache directory are not remembered.
#[derive(Clone)]
pub struct FetchCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for FetchCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCache")
            .field("config", &self.inner.config)
            .field("store", &self.inner.store)
            .field("entries", &self.inner.entries().len())
            .finish()
    }
}

impl FetchCache {
    /// Creates the cache, preparing its directory.
    ///
    /// Leftovers of downloads interrupted in a previous run are removed.
    pub fn new(
        config: FetchCacheConfig,
        store: Arc<dyn ObjectStore>,
        runtime: Handle,
    ) -> io::Result<Self> {
        let objects_dir = config.cache_dir.join("objects");
        let tmp_dir = config.cache_dir.join("tmp");

        std::fs::create_dir_all(&objects_dir)?;
        clear_tmp(&tmp_dir)?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                objects_dir,
                tmp_dir,
                store,
                runtime,
                entries: Mutex::new(BTreeMap::new()),
            }),
        })
    }

    /// Returns the local copy of the object stored under `key`, downloading it if necessary.
    pub async fn resolve(&self, key: &str) -> Result<Arc<CachedObject>, FetchError> {
        let key = ObjectKey::parse(key)?;

        let (channel, download) = {
            let mut entries = self.inner.entries();

            let pending = match entries.get(&key) {
                Some(EntryState::Ready(object)) => {
                    metric!(counter("fetch_cache.hit") += 1);
                    return Ok(object.clone());
                }
                Some(EntryState::Failed { error, since }) if !self.inner.is_expired(*since) => {
                    metric!(counter("fetch_cache.failure.hit") += 1);
                    return Err(error.clone());
                }
                Some(EntryState::Pending(channel)) => Some(channel.clone()),
                Some(EntryState::Failed { .. }) | None => None,
            };

            match pending {
                Some(channel) => {
                    metric!(counter("fetch_cache.join") += 1);
                    (channel, None)
                }
                None => {
                    metric!(counter("fetch_cache.miss") += 1);
                    let (channel, download) = self.prepare_download(key.clone());
                    entries.insert(key, EntryState::Pending(channel.clone()));
                    (channel, Some(download))
                }
            }
        };

        // Spawned after releasing the lock. A runtime that is shutting down drops the download
        // right away, and its guard needs the lock to clean up the pending entry.
        if let Some(download) = download {
            self.inner.runtime.spawn(download);
        }

        channel.await.unwrap_or(Err(FetchError::InternalError))
    }

    /// Forgets a downloaded object or a remembered failure.
    ///
    /// The file of a downloaded object is removed from the cache directory. Downloads in progress
    /// are not affected. Returns `true` if there was anything to forget.
    pub fn invalidate(&self, key: &str) -> bool {
        let Ok(key) = ObjectKey::parse(key) else {
            return false;
        };

        let mut entries = self.inner.entries();
        match entries.get(&key) {
            Some(EntryState::Ready(object)) => {
                // Removed while holding the lock, a concurrent download would otherwise pick up
                // the stale file.
                if let Err(err) = std::fs::remove_file(&object.path) {
                    if err.kind() != io::ErrorKind::NotFound {
                        let dynerr: &dyn std::error::Error = &err;
                        tracing::error!(error = dynerr, %key, "Failed to remove cached object");
                    }
                }
                entries.remove(&key);
                true
            }
            Some(EntryState::Failed { .. }) => {
                entries.remove(&key);
                true
            }
            Some(EntryState::Pending(_)) | None => false,
        }
    }

    /// Creates the download task for `key` together with the channel its result is sent on.
    fn prepare_download(
        &self,
        key: ObjectKey,
    ) -> (DownloadChannel, impl Future<Output = ()> + Send + 'static) {
        let (sender, receiver) = oneshot::channel();
        let guard = PendingGuard {
            inner: self.inner.clone(),
            key: Some(key.clone()),
        };

        let span = tracing::info_span!("download", %key);
        let download = async move {
            let start = Instant::now();
            let result = download(&guard.inner, &key).await.map(Arc::new);

            let status = match &result {
                Ok(_) => "ok",
                Err(err) if err.is_remote_failure() => "failed",
                Err(_) => "error",
            };
            metric!(timer("fetch_cache.download") = start.elapsed(), "status" => status);

            // Publish the outcome before notifying the waiters, so that later requests either
            // join this channel or see the final state.
            guard.complete(&result);
            sender.send(result).ok();
        }
        .instrument(span)
        .bind_hub(Hub::new_from_top(Hub::current()));

        (receiver.shared(), download)
    }
}

/// Removes the pending entry of a download that went away without completing.
struct PendingGuard {
    inner: Arc<Inner>,
    key: Option<ObjectKey>,
}

impl PendingGuard {
    fn complete(mut self, result: &DownloadResult) {
        let Some(key) = self.key.take() else {
            return;
        };

        let mut entries = self.inner.entries();
        match result {
            Ok(object) => {
                entries.insert(key, EntryState::Ready(object.clone()));
            }
            Err(error) if error.is_remote_failure() => {
                tracing::debug!(%key, %error, "Remembering failed download");
                let since = Instant::now();
                let error = error.clone();
                entries.insert(key, EntryState::Failed { error, since });
            }
            Err(_) => {
                entries.remove(&key);
            }
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            tracing::error!(%key, "Download was dropped before completing");
            let mut entries = self.inner.entries();
            if let Some(EntryState::Pending(_)) = entries.get(&key) {
                entries.remove(&key);
            }
        }
    }
}

async fn download(inner: &Inner, key: &ObjectKey) -> Result<CachedObject, FetchError> {
    let path = inner.objects_dir.join(key.relative_path());

    // Files only ever appear at their final path through a rename of a complete download, so a
    // file left by a previous run can be used as is.
    match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => {
            tracing::debug!(?path, "Using object downloaded in a previous run");
            metric!(counter("fetch_cache.file.reconciled") += 1);
            return Ok(CachedObject {
                key: key.clone(),
                path,
                size: metadata.len(),
            });
        }
        Ok(_) => {
            return Err(FetchError::storage(io::Error::other(
                "cache path is occupied by a directory",
            )));
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(FetchError::storage(err)),
    }

    let (temp_file, temp_path) = inner.tempfile().map_err(FetchError::storage)?.into_parts();
    let mut destination = File::from_std(temp_file);

    let fetch = fetch_into(inner.store.as_ref(), key, &mut destination);
    let size = match inner.config.download_timeout {
        Some(timeout) => tokio::time::timeout(timeout, fetch)
            .await
            .map_err(|_| FetchError::Timeout(timeout))?,
        None => fetch.await,
    }?;
    drop(destination);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(FetchError::storage)?;
    }
    temp_path
        .persist(&path)
        .map_err(|err| FetchError::storage(err.error))?;

    tracing::debug!(?path, size, "Downloaded object");
    metric!(time_raw("fetch_cache.file.size") = size);

    Ok(CachedObject {
        key: key.clone(),
        path,
        size,
    })
}

/// Streams the object into `destination`, returning the number of bytes written.
async fn fetch_into(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    destination: &mut File,
) -> Result<u64, FetchError> {
    let mut stream = store.get(key.as_str()).await?;

    let mut size = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        destination
            .write_all(&chunk)
            .await
            .map_err(FetchError::storage)?;
        size += chunk.len() as u64;
    }
    destination.flush().await.map_err(FetchError::storage)?;

    Ok(size)
}

fn clear_tmp(tmp_dir: &Path) -> io::Result<()> {
    if tmp_dir.exists() {
        tracing::info!(path = ?tmp_dir, "Removing partial downloads of a previous run");
        std::fs::remove_dir_all(tmp_dir)?;
    }
    std::fs::create_dir_all(tmp_dir)
}
