use serde::Deserialize;

use super::{RegistryError, RegistryHttp, ServerJar, SnapshotKey};

#[derive(Debug, Deserialize)]
struct Manifest {
    latest: LatestVersions,
    versions: Vec<ManifestVersion>,
}

#[derive(Debug, Deserialize)]
struct LatestVersions {
    release: String,
}

#[derive(Debug, Deserialize)]
struct ManifestVersion {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct VersionDocument {
    downloads: Downloads,
}

#[derive(Debug, Deserialize)]
struct Downloads {
    server: Option<DownloadInfo>,
}

#[derive(Debug, Deserialize)]
struct DownloadInfo {
    url: String,
    sha1: Option<String>,
    size: Option<u64>,
}

/// Client for the Mojang version manifest.
#[derive(Debug, Clone)]
pub struct MojangClient {
    http: RegistryHttp,
    manifest_url: String,
}

impl MojangClient {
    pub fn new(http: RegistryHttp, manifest_url: &str) -> Self {
        Self {
            http,
            manifest_url: manifest_url.to_string(),
        }
    }

    async fn manifest(&self) -> Result<Manifest, RegistryError> {
        let key = SnapshotKey::new("mojang", "version_manifest_v2");
        self.http.get_json(&self.manifest_url, &[], Some(&key)).await
    }

    /// The newest release version ID.
    pub async fn latest_release(&self) -> Result<String, RegistryError> {
        Ok(self.manifest().await?.latest.release)
    }

    /// The vanilla dedicated server jar for `game_version`.
    pub async fn server_jar(&self, game_version: &str) -> Result<ServerJar, RegistryError> {
        let manifest = self.manifest().await?;
        let entry = manifest
            .versions
            .into_iter()
            .find(|v| v.id == game_version)
            .ok_or_else(|| RegistryError::NotFound(format!("Minecraft version {game_version}")))?;

        let key = SnapshotKey::new("mojang", game_version);
        let document: VersionDocument = self.http.get_json(&entry.url, &[], Some(&key)).await?;
        let server = document.downloads.server.ok_or_else(|| {
            RegistryError::NotFound(format!("server download for Minecraft {game_version}"))
        })?;

        Ok(ServerJar {
            url: server.url,
            filename: format!("minecraft_server.{game_version}.jar"),
            version: game_version.to_string(),
            hash: server.sha1,
            size: server.size,
        })
    }
}
