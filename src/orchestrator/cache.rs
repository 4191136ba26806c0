use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

use crate::filesystem;
use crate::http::{self, HttpError, RetryPolicy};

/// First 16 hex chars of the URL's SHA-256.
pub fn cache_key(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    digest[..16].to_string()
}

/// Subdirectory grouping cache entries by download host.
pub fn host_dir(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Where a fetched artifact lives and whether this call downloaded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub path: PathBuf,
    pub size: u64,
    pub downloaded: bool,
}

/// Content-addressed download cache: `{root}/{host}/{key}-{filename}`.
///
/// Entries are written once through a partial file and never modified.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
    client: Client,
    retry: RetryPolicy,
}

impl ArtifactCache {
    /// # Arguments
    ///
    /// * `root` - Directory holding one subdirectory per download host.
    /// * `client` - Client used on a cache miss.
    /// * `retry` - Retry policy for those downloads.
    pub fn new<P: Into<PathBuf>>(root: P, client: Client, retry: RetryPolicy) -> Self {
        Self {
            root: root.into(),
            client,
            retry,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path the entry for `url` has, whether or not it exists yet.
    pub fn entry_path(&self, url: &str, filename: &str) -> PathBuf {
        self.root
            .join(host_dir(url))
            .join(format!("{}-{}", cache_key(url), filename))
    }

    /// Size of the cached entry for `url`, if there is a non-empty one.
    pub fn cached_size(&self, url: &str, filename: &str) -> Option<u64> {
        filesystem::file_len(self.entry_path(url, filename)).filter(|size| *size > 0)
    }

    /// Returns the cache entry for `url`, downloading it first on a miss.
    pub async fn fetch(
        &self,
        url: &str,
        filename: &str,
        expected_hash: Option<&str>,
    ) -> Result<CachedArtifact, HttpError> {
        let path = self.entry_path(url, filename);
        if let Some(size) = self.cached_size(url, filename) {
            let intact = match expected_hash {
                Some(expected) => http::verify_hash(&path, expected)?,
                None => true,
            };
            if intact {
                debug!("Cache hit for {} at {}", url, path.display());
                return Ok(CachedArtifact {
                    path,
                    size,
                    downloaded: false,
                });
            }
            warn!("Cached {} does not match its published hash, fetching again", path.display());
            filesystem::remove_if_exists(&path)?;
        }

        debug!("Cache miss for {}", url);
        let size = http::download_to_file(&self.client, &self.retry, url, &path, expected_hash).await?;
        Ok(CachedArtifact {
            path,
            size,
            downloaded: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn identical_urls_share_a_key() {
        let a = cache_key("https://cdn.modrinth.com/data/x/a.jar");
        assert_eq!(a.len(), 16);
        assert_eq!(a, cache_key("https://cdn.modrinth.com/data/x/a.jar"));
        assert_ne!(a, cache_key("https://cdn.modrinth.com/data/x/b.jar"));
        assert_eq!(host_dir("https://cdn.modrinth.com/data/x/a.jar"), "cdn.modrinth.com");
        assert_eq!(host_dir("not a url"), "unknown-host");
    }

    #[tokio::test]
    async fn second_fetch_is_a_cache_hit() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/files/a.jar");
                then.status(200).body("jar-bytes");
            })
            .await;

        let dir = tempdir().unwrap();
        let client = http::build_client("test", Duration::from_secs(5)).unwrap();
        let cache = ArtifactCache::new(dir.path(), client, RetryPolicy::none());
        let url = server.url("/files/a.jar");

        let first = cache.fetch(&url, "a.jar", None).await.unwrap();
        let second = cache.fetch(&url, "a.jar", None).await.unwrap();

        mock.assert_hits_async(1).await;
        assert!(first.downloaded);
        assert!(!second.downloaded);
        assert_eq!(first.path, second.path);
        assert_eq!(second.size, 9);
        assert!(first.path.ends_with(format!("{}-a.jar", cache_key(&url))));
    }

    #[tokio::test]
    async fn corrupted_entry_is_fetched_again() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/files/b.jar");
                then.status(200).body("good");
            })
            .await;

        let dir = tempdir().unwrap();
        let client = http::build_client("test", Duration::from_secs(5)).unwrap();
        let cache = ArtifactCache::new(dir.path(), client, RetryPolicy::none());
        let url = server.url("/files/b.jar");
        let sha1 = hex::encode(<sha1::Sha1 as sha1::Digest>::digest(b"good"));

        let entry = cache.entry_path(&url, "b.jar");
        std::fs::create_dir_all(entry.parent().unwrap()).unwrap();
        std::fs::write(&entry, b"bad!").unwrap();

        let fetched = cache.fetch(&url, "b.jar", Some(&sha1)).await.unwrap();
        assert!(fetched.downloaded);
        assert_eq!(std::fs::read(&entry).unwrap(), b"good");
        mock.assert_hits_async(1).await;
    }
}
