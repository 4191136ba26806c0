use serde::Deserialize;

use super::{RegistryError, RegistryHttp, ServerJar, SnapshotKey};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoaderInfo {
    pub version: String,
    #[serde(default)]
    pub stable: bool,
}

#[derive(Debug, Deserialize)]
struct LoaderEntry {
    loader: LoaderInfo,
}

#[derive(Debug, Deserialize)]
struct InstallerEntry {
    version: String,
    #[serde(default)]
    stable: bool,
}

/// Client for Fabric Meta.
#[derive(Debug, Clone)]
pub struct FabricClient {
    http: RegistryHttp,
    base: String,
}

impl FabricClient {
    pub fn new(http: RegistryHttp, base: &str) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Loader versions available for a game version, newest first.
    pub async fn loader_versions(&self, game_version: &str) -> Result<Vec<LoaderInfo>, RegistryError> {
        let url = format!("{}/v2/versions/loader/{}", self.base, game_version);
        let key = SnapshotKey::new("fabric", &format!("loader-{game_version}"));
        let entries: Vec<LoaderEntry> = self.http.get_json(&url, &[], Some(&key)).await?;
        if entries.is_empty() {
            return Err(RegistryError::NotFound(format!(
                "Fabric loader for Minecraft {game_version}"
            )));
        }
        Ok(entries.into_iter().map(|e| e.loader).collect())
    }

    async fn latest_installer(&self) -> Result<String, RegistryError> {
        let url = format!("{}/v2/versions/installer", self.base);
        let key = SnapshotKey::new("fabric", "installer");
        let entries: Vec<InstallerEntry> = self.http.get_json(&url, &[], Some(&key)).await?;
        entries
            .iter()
            .find(|e| e.stable)
            .or_else(|| entries.first())
            .map(|e| e.version.clone())
            .ok_or_else(|| RegistryError::NotFound("Fabric installer versions".to_string()))
    }

    /// The Fabric server launcher jar for `game_version`, built from the
    /// newest stable loader and installer.
    pub async fn server_jar(&self, game_version: &str) -> Result<ServerJar, RegistryError> {
        let loaders = self.loader_versions(game_version).await?;
        let loader = loaders
            .iter()
            .find(|l| l.stable)
            .or_else(|| loaders.first())
            .map(|l| l.version.clone())
            .ok_or_else(|| RegistryError::NotFound(format!("Fabric loader for {game_version}")))?;
        let installer = self.latest_installer().await?;

        Ok(ServerJar {
            url: format!(
                "{}/v2/versions/loader/{}/{}/{}/server/jar",
                self.base, game_version, loader, installer
            ),
            filename: format!(
                "fabric-server-mc.{game_version}-loader.{loader}-launcher.{installer}.jar"
            ),
            version: loader,
            hash: None,
            size: None,
        })
    }
}
