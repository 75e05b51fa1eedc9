//! Helpers for testing the web server.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Hold on to the [`Server`] until all requests have been made. Dropping it stops the server
//!    and removes its cache directory.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use mediagate_service::caching::{FetchCache, FetchCacheConfig};
use mediagate_service::services::MediaService;
use mediagate_service::test::MockStore;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::endpoints;

pub use mediagate_test::{TempDir, payload, setup, tempdir};

/// The gateway running on an ephemeral port, backed by a [`MockStore`].
#[derive(Debug)]
pub struct Server {
    addr: SocketAddr,
    handle: JoinHandle<()>,
    _cache_dir: TempDir,
}

impl Server {
    pub async fn start(store: Arc<MockStore>) -> Self {
        Self::start_with_static(store, None).await
    }

    pub async fn start_with_static(store: Arc<MockStore>, static_dir: Option<&Path>) -> Self {
        let cache_dir = tempdir();
        let config = FetchCacheConfig {
            cache_dir: cache_dir.path().to_owned(),
            download_timeout: None,
            retry_failures_after: None,
        };
        let cache = FetchCache::new(config, store.clone(), Handle::current()).unwrap();
        let service = MediaService::new(store, cache);
        let app = endpoints::create_app(service, static_dir);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            handle,
            _cache_dir: cache_dir,
        }
    }

    /// Returns the full URL of `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A client that does not follow redirects.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
