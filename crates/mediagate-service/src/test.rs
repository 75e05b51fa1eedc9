//! Helpers for testing code that talks to an [`ObjectStore`].
//!
//! Re-exports the generic helpers of the `mediagate-test` crate, and adds [`MockStore`], an
//! in-memory store that records how often it was asked for each key.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Poll;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};

pub use mediagate_test::{TempDir, payload, setup, tempdir};

use crate::store::{ObjectStore, ObjectStream, StoreError};

/// Size of the chunks the body of a [`MockObject::Data`] is split into.
const CHUNK_SIZE: usize = 4096;

/// Contents of a key in a [`MockStore`].
#[derive(Debug, Clone)]
pub enum MockObject {
    /// The object is served completely.
    Data(Bytes),
    /// Requesting the object fails right away.
    Error(StoreError),
    /// The body breaks off with an error after `prefix` was sent.
    Broken { prefix: Bytes, error: StoreError },
    /// The body panics while being read.
    Panic,
}

/// An in-memory [`ObjectStore`].
#[derive(Debug, Default)]
pub struct MockStore {
    objects: Mutex<BTreeMap<String, MockObject>>,
    list_error: Mutex<Option<StoreError>>,
    delay: Option<Duration>,
    list_calls: AtomicUsize,
    get_calls: Mutex<BTreeMap<String, usize>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: &str, data: impl Into<Bytes>) -> Self {
        self.insert(key, MockObject::Data(data.into()));
        self
    }

    pub fn with_error(self, key: &str, error: StoreError) -> Self {
        self.insert(key, MockObject::Error(error));
        self
    }

    pub fn with_list_error(self, error: StoreError) -> Self {
        *self.list_error.lock().unwrap() = Some(error);
        self
    }

    /// Delays every `get` by the given duration before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Adds or replaces an object.
    pub fn insert(&self, key: &str, object: MockObject) {
        self.objects.lock().unwrap().insert(key.to_owned(), object);
    }

    /// The number of `get` calls for `key`.
    pub fn get_calls(&self, key: &str) -> usize {
        self.get_calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// The number of `get` calls for all keys.
    pub fn total_get_calls(&self) -> usize {
        self.get_calls.lock().unwrap().values().sum()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl ObjectStore for MockStore {
    fn list(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let result = match self.list_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(self.objects.lock().unwrap().keys().cloned().collect()),
        };
        futures::future::ready(result).boxed()
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<ObjectStream, StoreError>> {
        *self
            .get_calls
            .lock()
            .unwrap()
            .entry(key.to_owned())
            .or_default() += 1;

        async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let object = self.objects.lock().unwrap().get(key).cloned();
            match object {
                None => Err(StoreError::NotFound),
                Some(MockObject::Error(error)) => Err(error),
                Some(MockObject::Data(data)) => Ok(chunked(data).map(Ok).boxed()),
                Some(MockObject::Broken { prefix, error }) => Ok(chunked(prefix)
                    .map(Ok)
                    .chain(futures::stream::once(async move { Err(error) }))
                    .boxed()),
                Some(MockObject::Panic) => Ok(futures::stream::poll_fn(
                    |_| -> Poll<Option<Result<Bytes, StoreError>>> {
                        panic!("mock object exploded")
                    },
                )
                .boxed()),
            }
        }
        .boxed()
    }
}

fn chunked(data: Bytes) -> impl futures::Stream<Item = Bytes> + Send + 'static {
    let chunks: Vec<_> = (0..data.len())
        .step_by(CHUNK_SIZE)
        .map(|start| data.slice(start..data.len().min(start + CHUNK_SIZE)))
        .collect();
    futures::stream::iter(chunks)
}
