use std::path::PathBuf;
use std::time::Duration;

use crate::filesystem::expand_home;
use crate::http::RetryPolicy;

/// Environment variable holding the CurseForge API key.
pub const CURSEFORGE_API_KEY_VAR: &str = "CURSEFORGE_API_KEY";
/// Environment variable holding an optional GitHub token (raises the rate limit).
pub const GITHUB_TOKEN_VAR: &str = "GITHUB_TOKEN";
/// Overrides the Mojang version manifest URL.
pub const MOJANG_MANIFEST_URL_VAR: &str = "MOJANG_MANIFEST_URL";
/// Overrides the Fabric Meta base URL.
pub const FABRIC_META_URL_VAR: &str = "FABRIC_META_URL";

const APP_USER_AGENT: &str = concat!("junco-modpack-manager/", env!("CARGO_PKG_VERSION"));

/// Base URLs of every upstream the registry clients talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub modrinth: String,
    pub curseforge: String,
    pub github: String,
    pub fabric_meta: String,
    /// Full URL of `version_manifest_v2.json`.
    pub mojang_manifest: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            modrinth: "https://api.modrinth.com".to_string(),
            curseforge: "https://api.curseforge.com".to_string(),
            github: "https://api.github.com".to_string(),
            fabric_meta: "https://meta.fabricmc.net".to_string(),
            mojang_manifest: "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json"
                .to_string(),
        }
    }
}

impl Endpoints {
    /// Points every registry at the same base URL. Used against mock servers.
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            modrinth: base.to_string(),
            curseforge: base.to_string(),
            github: base.to_string(),
            fabric_meta: base.to_string(),
            mojang_manifest: format!("{base}/mc/game/version_manifest_v2.json"),
        }
    }
}

/// Everything a resolver or batch run needs, passed explicitly.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root of the version-organised download tree.
    pub download_root: PathBuf,
    /// Root of the artifact cache and the registry snapshot cache.
    pub cache_root: PathBuf,
    pub endpoints: Endpoints,
    pub curseforge_api_key: Option<String>,
    pub github_token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
    /// Snapshots younger than this are reused even without `use_cached_responses`.
    pub snapshot_freshness: Duration,
    /// Reuse any registry snapshot on disk, regardless of age.
    pub use_cached_responses: bool,
}

impl ManagerConfig {
    /// Creates a configuration with public registry endpoints and default limits.
    ///
    /// # Arguments
    ///
    /// * `download_root` - Root of the `{gameVersion}/{typeSubfolder}` tree.
    ///
    /// # Returns
    ///
    /// A configuration caching under the platform cache directory, with a 30
    /// second timeout and no CurseForge key.
    pub fn new<P: Into<PathBuf>>(download_root: P) -> Self {
        Self {
            download_root: download_root.into(),
            cache_root: default_cache_root(),
            endpoints: Endpoints::default(),
            curseforge_api_key: None,
            github_token: None,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            user_agent: APP_USER_AGENT.to_string(),
            snapshot_freshness: Duration::from_secs(5 * 60),
            use_cached_responses: false,
        }
    }

    /// Builds a configuration from the process environment.
    ///
    /// Reads the CurseForge key, the GitHub token and the optional
    /// Mojang/Fabric endpoint overrides. `~` in `download_root` is expanded.
    pub fn from_env(download_root: &str) -> Self {
        Self::from_lookup(download_root, |key| std::env::var(key).ok())
    }

    fn from_lookup<F>(download_root: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::new(expand_home(download_root));
        config.curseforge_api_key = non_empty(CURSEFORGE_API_KEY_VAR);
        config.github_token = non_empty(GITHUB_TOKEN_VAR);
        if let Some(url) = non_empty(MOJANG_MANIFEST_URL_VAR) {
            config.endpoints.mojang_manifest = url;
        }
        if let Some(url) = non_empty(FABRIC_META_URL_VAR) {
            config.endpoints.fabric_meta = url.trim_end_matches('/').to_string();
        }
        config
    }

    /// Moves both the artifact and snapshot caches below `cache_root`.
    pub fn with_cache_root<P: Into<PathBuf>>(mut self, cache_root: P) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Sets the key sent as `x-api-key` to CurseForge.
    pub fn with_curseforge_api_key<S: Into<String>>(mut self, key: S) -> Self {
        self.curseforge_api_key = Some(key.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reuses registry snapshots of any age when `true`.
    pub fn with_cached_responses(mut self, use_cached_responses: bool) -> Self {
        self.use_cached_responses = use_cached_responses;
        self
    }

    /// Directory holding registry JSON snapshots.
    pub fn snapshot_root(&self) -> PathBuf {
        self.cache_root.join("api")
    }

    /// Directory holding downloaded artifacts, one subdirectory per host.
    pub fn artifact_root(&self) -> PathBuf {
        self.cache_root.join("artifacts")
    }
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("junco-modpack-manager")
}
