use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::filesystem::{self, FilesystemError};

/// Location of one registry response snapshot: `{host}/{file}.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotKey {
    host: &'static str,
    file: String,
}

impl SnapshotKey {
    /// `name` is sanitised so IDs like `owner/repo` stay a single file.
    pub fn new(host: &'static str, name: &str) -> Self {
        let file: String = name
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '?' | '&' | '=' | ' ' => '-',
                c => c,
            })
            .collect();
        Self {
            host,
            file: format!("{file}.json"),
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.file)
    }
}

/// JSON response snapshots on disk.
///
/// A snapshot is reused when the caller asked for cached responses, or when
/// it is younger than the freshness window.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    root: PathBuf,
    freshness: Duration,
    use_cache: bool,
}

impl SnapshotCache {
    pub fn new(root: PathBuf, freshness: Duration, use_cache: bool) -> Self {
        Self {
            root,
            freshness,
            use_cache,
        }
    }

    pub fn path(&self, key: &SnapshotKey) -> PathBuf {
        self.root.join(key.host).join(&key.file)
    }

    /// Returns the snapshot body if it may be used.
    pub fn read(&self, key: &SnapshotKey) -> Option<String> {
        let path = self.path(key);
        let metadata = fs::metadata(&path).ok()?;
        let fresh = metadata
            .modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .is_some_and(|age| age < self.freshness);
        if self.use_cache || fresh {
            fs::read_to_string(&path).ok()
        } else {
            None
        }
    }

    /// Stores a raw response body atomically.
    ///
    /// # Errors
    ///
    /// Returns `FilesystemError` if the directory or file cannot be written.
    pub fn write(&self, key: &SnapshotKey, body: &str) -> Result<(), FilesystemError> {
        filesystem::write_file(self.path(key), body.as_bytes())
    }
}
