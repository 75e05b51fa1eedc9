//! Support to serve media from the local filesystem.
//!
//! It treats a directory like a bucket, usually only used for local development and testing.

use std::io;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, TryStreamExt};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use walkdir::WalkDir;

use super::{ObjectStore, ObjectStream, StoreError};

/// An [`ObjectStore`] backed by a local directory.
///
/// Keys are the paths of regular files relative to the root, joined with `/`.
#[derive(Debug)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Maps a key to a path below the root, refusing anything that could escape it.
    fn object_path(&self, key: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
                return None;
            }
            path.push(segment);
        }
        Some(path)
    }

    async fn get_object(&self, key: &str) -> Result<ObjectStream, StoreError> {
        let path = self.object_path(key).ok_or(StoreError::NotFound)?;
        tracing::debug!("Fetching media file from {:?}", path);

        let file = File::open(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound,
            io::ErrorKind::PermissionDenied => StoreError::PermissionDenied(e.to_string()),
            _ => StoreError::unavailable(&e),
        })?;

        Ok(ReaderStream::new(file)
            .map_err(|e| StoreError::unavailable(&e))
            .boxed())
    }
}

fn list_dir(root: &Path) -> Result<Vec<String>, StoreError> {
    if !root.is_dir() {
        return Err(StoreError::NotFound);
    }

    let mut keys = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| StoreError::unavailable(&e))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let segments: Option<Vec<_>> = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect();
        match segments {
            Some(segments) => keys.push(segments.join("/")),
            None => tracing::warn!(path = ?entry.path(), "Skipping non UTF-8 file name"),
        }
    }

    Ok(keys)
}

impl ObjectStore for FilesystemStore {
    fn list(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        let root = self.root.clone();
        async move {
            tokio::task::spawn_blocking(move || list_dir(&root))
                .await
                .map_err(|e| StoreError::unavailable(&e))?
        }
        .boxed()
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<ObjectStream, StoreError>> {
        self.get_object(key).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test;

    #[tokio::test]
    async fn test_list_nested() {
        test::setup();
        let dir = test::tempdir();
        std::fs::create_dir_all(dir.path().join("albums/live")).unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"a").unwrap();
        std::fs::write(dir.path().join("albums/live/b c.mp3"), b"b").unwrap();

        let store = FilesystemStore::new(dir.path().to_owned());
        let mut keys = store.list().await.unwrap();
        keys.sort();

        assert_eq!(keys, ["a.mp3", "albums/live/b c.mp3"]);
    }

    #[tokio::test]
    async fn test_get() {
        test::setup();
        let dir = test::tempdir();
        let payload = test::payload(100_000);
        std::fs::write(dir.path().join("clip.mp4"), &payload).unwrap();

        let store = FilesystemStore::new(dir.path().to_owned());
        let chunks: Vec<_> = store
            .get("clip.mp4")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(chunks.concat(), payload);
    }

    #[tokio::test]
    async fn test_missing() {
        test::setup();
        let dir = test::tempdir();
        let store = FilesystemStore::new(dir.path().to_owned());

        assert_eq!(store.get("nope.mp3").await.err(), Some(StoreError::NotFound));
        assert_eq!(store.get("../etc/passwd").await.err(), Some(StoreError::NotFound));

        let store = FilesystemStore::new(dir.path().join("missing"));
        assert_eq!(store.list().await, Err(StoreError::NotFound));
    }
}
