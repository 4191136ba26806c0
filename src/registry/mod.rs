//! Clients for the upstream registries a mod record can point at.
//!
//! Modrinth and CurseForge share the [`VersionRegistry`] shape (project +
//! flat version list). GitHub releases, Fabric Meta and the Mojang manifest
//! have their own data shapes and expose dedicated methods.

mod curseforge;
mod fabric;
mod github;
mod modrinth;
mod mojang;
mod snapshot;

pub use curseforge::{CURSEFORGE_MINECRAFT_GAME_ID, CurseForgeClient};
pub use fabric::{FabricClient, LoaderInfo};
pub use github::{GithubClient, Release, ReleaseAsset};
pub use modrinth::ModrinthClient;
pub use mojang::MojangClient;
pub use snapshot::{SnapshotCache, SnapshotKey};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::io;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ManagerConfig;
use crate::filesystem::FilesystemError;
use crate::http::{self, HttpError, RetryPolicy};
use crate::record::{Host, SideSupport};

/// Errors raised by registry clients.
///
/// Configuration problems, missing upstream objects and rate limiting are
/// kept apart so callers can react to each differently.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Missing API key or similar local setup problem. Nothing was sent.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The project, version, release or asset does not exist upstream.
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Http(HttpError),
    #[error("invalid JSON from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

impl From<HttpError> for RegistryError {
    fn from(error: HttpError) -> Self {
        match error {
            HttpError::Status { url, status: 404 } => RegistryError::NotFound(url),
            other => RegistryError::Http(other),
        }
    }
}

impl RegistryError {
    /// Missing or invalid local setup, such as an absent API key.
    pub fn is_configuration(&self) -> bool {
        matches!(self, RegistryError::Configuration(_))
    }

    /// The registry answered 404 or the identifier cannot exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }

    /// Retries were exhausted on HTTP 429.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RegistryError::Http(HttpError::RateLimited { .. }))
    }
}

/// Project-level metadata common to every registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectMetadata {
    /// Registry-native identifier (Modrinth project ID, CurseForge numeric ID, `owner/repo`).
    pub id: String,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub project_url: String,
    pub client_side: SideSupport,
    pub server_side: SideSupport,
}

/// How a dependency relates to the artifact declaring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    Required,
    Optional,
    Incompatible,
    Embedded,
    Tool,
    Include,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub id: String,
    pub kind: RelationKind,
}

/// One downloadable version/file as listed by a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionEntry {
    /// Registry-native version or file ID.
    pub id: String,
    /// Version (or display) string.
    pub version: String,
    pub loaders: Vec<String>,
    /// Supported game versions, primary compatibility first.
    pub game_versions: Vec<String>,
    pub url: String,
    pub filename: String,
    pub dependencies: Vec<Dependency>,
    pub published: Option<DateTime<Utc>>,
    /// Hex digest published by the registry (SHA-1 or SHA-512).
    pub hash: Option<String>,
    pub size: Option<u64>,
}

/// A server jar located through Fabric Meta or the Mojang manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerJar {
    pub url: String,
    pub filename: String,
    pub version: String,
    pub hash: Option<String>,
    pub size: Option<u64>,
}

/// Registries that list a project's versions as a flat list.
#[async_trait]
pub trait VersionRegistry: Send + Sync {
    fn host(&self) -> Host;

    /// Fetches project metadata, persisting a JSON snapshot on success.
    async fn project(&self, id: &str) -> Result<ProjectMetadata, RegistryError>;

    /// Fetches every version/file of a project, newest first when the registry sorts them.
    async fn versions(&self, id: &str) -> Result<Vec<VersionEntry>, RegistryError>;
}

/// HTTP access shared by every registry client: one client, one retry
/// policy, one snapshot cache.
#[derive(Debug, Clone)]
pub struct RegistryHttp {
    client: Client,
    retry: RetryPolicy,
    snapshots: SnapshotCache,
}

impl RegistryHttp {
    pub fn new(config: &ManagerConfig) -> Result<Self, RegistryError> {
        let client = http::build_client(&config.user_agent, config.timeout).map_err(|e| {
            RegistryError::Configuration(format!("cannot build HTTP client: {e}"))
        })?;
        Ok(Self {
            client,
            retry: config.retry.clone(),
            snapshots: SnapshotCache::new(
                config.snapshot_root(),
                config.snapshot_freshness,
                config.use_cached_responses,
            ),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// GETs `url` as JSON, going through the snapshot cache when `snapshot` is set.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, String)],
        snapshot: Option<&SnapshotKey>,
    ) -> Result<T, RegistryError> {
        if let Some(key) = snapshot {
            if let Some(body) = self.snapshots.read(key) {
                match serde_json::from_str(&body) {
                    Ok(value) => {
                        debug!("Using snapshot {} for {}", key, url);
                        return Ok(value);
                    }
                    Err(e) => warn!("Ignoring unreadable snapshot {}: {}", key, e),
                }
            }
        }

        let response = http::send_with_retry(&self.retry, url, || {
            headers
                .iter()
                .fold(self.client.get(url), |req, (name, value)| {
                    req.header(*name, value.as_str())
                })
        })
        .await?;
        let body = response.text().await.map_err(|source| HttpError::Network {
            url: url.to_string(),
            source,
        })?;

        let value = serde_json::from_str(&body).map_err(|source| RegistryError::Json {
            url: url.to_string(),
            source,
        })?;

        if let Some(key) = snapshot {
            if let Err(e) = self.snapshots.write(key, &body) {
                warn!("Could not write snapshot {}: {}", key, e);
            }
        }
        Ok(value)
    }
}

/// Every registry client, built from one configuration.
#[derive(Debug, Clone)]
pub struct Registries {
    pub modrinth: ModrinthClient,
    pub curseforge: CurseForgeClient,
    pub github: GithubClient,
    pub fabric: FabricClient,
    pub mojang: MojangClient,
}

impl Registries {
    pub fn new(config: &ManagerConfig) -> Result<Self, RegistryError> {
        let http = RegistryHttp::new(config)?;
        let endpoints = &config.endpoints;
        Ok(Self {
            modrinth: ModrinthClient::new(http.clone(), &endpoints.modrinth),
            curseforge: CurseForgeClient::new(
                http.clone(),
                &endpoints.curseforge,
                config.curseforge_api_key.clone(),
            ),
            github: GithubClient::new(http.clone(), &endpoints.github, config.github_token.clone()),
            fabric: FabricClient::new(http.clone(), &endpoints.fabric_meta),
            mojang: MojangClient::new(http, &endpoints.mojang_manifest),
        })
    }

    /// The flat-list registry for `host`, if it has one.
    pub fn version_registry(&self, host: Host) -> Option<&dyn VersionRegistry> {
        match host {
            Host::Modrinth => Some(&self.modrinth),
            Host::CurseForge => Some(&self.curseforge),
            Host::GitHub | Host::Direct => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::Endpoints;
    use std::path::Path;

    /// Config pointing every registry at `base`, caching below `cache_root`.
    pub fn config_for(base: &str, cache_root: &Path) -> ManagerConfig {
        ManagerConfig::new(cache_root.join("downloads"))
            .with_cache_root(cache_root.join("cache"))
            .with_endpoints(Endpoints::all_at(base))
            .with_retry(RetryPolicy::none())
    }

    pub fn registry_http(base: &str, cache_root: &Path) -> RegistryHttp {
        RegistryHttp::new(&config_for(base, cache_root)).unwrap()
    }
}
