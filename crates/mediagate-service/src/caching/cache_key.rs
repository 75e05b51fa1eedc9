use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// The longest key accepted, in bytes. Matches the S3 limit for object keys.
pub const MAX_KEY_LEN: usize = 1024;

/// A validated object key that can be mapped onto the local filesystem.
///
/// A key is a `/` separated list of segments. None of the segments may be empty, `.` or `..`, and
/// the key may not contain backslashes or NUL bytes. This guarantees that [`relative_path`] never
/// points outside of the directory it is joined onto.
///
/// [`relative_path`]: Self::relative_path
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey(Arc<str>);

/// Reasons a key is refused by [`ObjectKey::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidKey {
    #[error("key is empty")]
    Empty,
    #[error("key is longer than {MAX_KEY_LEN} bytes")]
    TooLong,
    #[error("key contains an empty, `.` or `..` segment")]
    BadSegment,
    #[error("key contains a backslash or NUL byte")]
    BadCharacter,
}

impl ObjectKey {
    pub fn parse(key: &str) -> Result<Self, InvalidKey> {
        if key.is_empty() {
            return Err(InvalidKey::Empty);
        }
        if key.len() > MAX_KEY_LEN {
            return Err(InvalidKey::TooLong);
        }
        if key.contains(['\\', '\0']) {
            return Err(InvalidKey::BadCharacter);
        }
        // A leading `/` shows up as an empty first segment.
        if key
            .split('/')
            .any(|segment| matches!(segment, "" | "." | ".."))
        {
            return Err(InvalidKey::BadSegment);
        }

        Ok(Self(key.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path of the cached object relative to the objects directory.
    pub fn relative_path(&self) -> PathBuf {
        self.0.split('/').collect()
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
