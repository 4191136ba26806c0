use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{
    Dependency, ProjectMetadata, RegistryError, RegistryHttp, RelationKind, SnapshotKey,
    VersionEntry, VersionRegistry,
};
use crate::config::CURSEFORGE_API_KEY_VAR;
use crate::record::{Host, identify_url};

/// CurseForge's game ID for Minecraft.
pub const CURSEFORGE_MINECRAFT_GAME_ID: u32 = 432;

const PAGE_SIZE: u64 = 50;

/// Names CurseForge mixes into `gameVersions` that are really loaders.
const KNOWN_LOADERS: &[&str] = &[
    "fabric", "forge", "neoforge", "quilt", "iris", "optifine", "canvas", "liteloader", "rift",
];

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    data: Vec<T>,
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    index: u64,
    result_count: u64,
    total_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurseMod {
    id: u64,
    name: String,
    slug: String,
    #[serde(default)]
    summary: String,
    links: Option<CurseLinks>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurseLinks {
    website_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurseFile {
    id: u64,
    display_name: String,
    file_name: String,
    file_date: Option<DateTime<Utc>>,
    download_url: Option<String>,
    #[serde(default)]
    game_versions: Vec<String>,
    #[serde(default)]
    dependencies: Vec<CurseDependency>,
    #[serde(default)]
    hashes: Vec<CurseHash>,
    file_length: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurseDependency {
    mod_id: u64,
    relation_type: u8,
}

#[derive(Debug, Deserialize)]
struct CurseHash {
    value: String,
    algo: u8,
}

fn relation(relation_type: u8) -> Option<RelationKind> {
    match relation_type {
        1 => Some(RelationKind::Embedded),
        2 => Some(RelationKind::Optional),
        3 => Some(RelationKind::Required),
        4 => Some(RelationKind::Tool),
        5 => Some(RelationKind::Incompatible),
        6 => Some(RelationKind::Include),
        _ => None,
    }
}

/// Splits CurseForge's mixed `gameVersions` list into loaders and game versions.
fn split_game_versions(raw: &[String]) -> (Vec<String>, Vec<String>) {
    let mut loaders = Vec::new();
    let mut game_versions = Vec::new();
    for value in raw {
        let lower = value.to_ascii_lowercase();
        if lower.starts_with(|c: char| c.is_ascii_digit()) {
            game_versions.push(value.clone());
        } else if KNOWN_LOADERS.contains(&lower.as_str()) {
            loaders.push(lower);
        }
    }
    (loaders, game_versions)
}

impl CurseFile {
    fn into_entry(self) -> VersionEntry {
        let (loaders, game_versions) = split_game_versions(&self.game_versions);
        let url = self.download_url.unwrap_or_else(|| {
            format!(
                "https://edge.forgecdn.net/files/{}/{}/{}",
                self.id / 1000,
                self.id % 1000,
                self.file_name
            )
        });
        let hash = self
            .hashes
            .into_iter()
            .find(|h| h.algo == 1)
            .map(|h| h.value);
        let dependencies = self
            .dependencies
            .into_iter()
            .filter_map(|d| {
                Some(Dependency {
                    id: d.mod_id.to_string(),
                    kind: relation(d.relation_type)?,
                })
            })
            .collect();

        VersionEntry {
            id: self.id.to_string(),
            version: self.display_name,
            loaders,
            game_versions,
            url,
            filename: self.file_name,
            dependencies,
            published: self.file_date,
            hash,
            size: self.file_length,
        }
    }
}

/// Client for the CurseForge v1 API. Every call needs an API key.
#[derive(Debug, Clone)]
pub struct CurseForgeClient {
    http: RegistryHttp,
    base: String,
    api_key: Option<String>,
}

impl CurseForgeClient {
    pub fn new(http: RegistryHttp, base: &str, api_key: Option<String>) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn headers(&self) -> Result<[(&'static str, String); 1], RegistryError> {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => Ok([("x-api-key", key.to_string())]),
            _ => Err(RegistryError::Configuration(format!(
                "{CURSEFORGE_API_KEY_VAR} is not set; CurseForge requests need an API key"
            ))),
        }
    }

    /// Turns a slug, project URL or numeric ID into CurseForge's numeric mod ID.
    ///
    /// Slugs are looked up through search: an exact slug match wins, otherwise
    /// the top hit is taken.
    pub async fn resolve_project_id(&self, slug_or_url: &str) -> Result<u64, RegistryError> {
        let headers = self.headers()?;
        let trimmed = slug_or_url.trim();
        if let Ok(id) = trimmed.parse::<u64>() {
            return Ok(id);
        }

        let slug = if trimmed.contains("curseforge.com") {
            identify_url(trimmed)
                .map_err(|e| RegistryError::NotFound(e.to_string()))?
                .id
        } else {
            trimmed.to_string()
        };

        let url = Url::parse_with_params(
            &format!("{}/v1/mods/search", self.base),
            &[
                ("gameId", CURSEFORGE_MINECRAFT_GAME_ID.to_string()),
                ("searchFilter", slug.clone()),
            ],
        )
        .map_err(|e| RegistryError::Configuration(format!("invalid CurseForge base URL: {e}")))?;

        let key = SnapshotKey::new("curseforge", &format!("search-{slug}"));
        let results: Page<CurseMod> = self
            .http
            .get_json(url.as_str(), &headers, Some(&key))
            .await?;

        let hit = results
            .data
            .iter()
            .find(|m| m.slug.eq_ignore_ascii_case(&slug))
            .or_else(|| results.data.first())
            .ok_or_else(|| RegistryError::NotFound(format!("CurseForge project '{slug}'")))?;
        debug!("Resolved CurseForge slug {} to {}", slug, hit.id);
        Ok(hit.id)
    }
}

#[async_trait]
impl VersionRegistry for CurseForgeClient {
    fn host(&self) -> Host {
        Host::CurseForge
    }

    async fn project(&self, id: &str) -> Result<ProjectMetadata, RegistryError> {
        let headers = self.headers()?;
        let numeric = self.resolve_project_id(id).await?;
        let url = format!("{}/v1/mods/{}", self.base, numeric);
        let key = SnapshotKey::new("curseforge", &numeric.to_string());
        let project: Envelope<CurseMod> = self.http.get_json(&url, &headers, Some(&key)).await?;
        let project = project.data;

        let project_url = project
            .links
            .and_then(|l| l.website_url)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| {
                format!("https://www.curseforge.com/minecraft/mc-mods/{}", project.slug)
            });
        Ok(ProjectMetadata {
            id: project.id.to_string(),
            slug: project.slug,
            title: project.name,
            description: project.summary,
            project_url,
            ..ProjectMetadata::default()
        })
    }

    async fn versions(&self, id: &str) -> Result<Vec<VersionEntry>, RegistryError> {
        let headers = self.headers()?;
        let numeric = self.resolve_project_id(id).await?;

        let mut entries = Vec::new();
        let mut index = 0u64;
        loop {
            let url = format!(
                "{}/v1/mods/{}/files?index={}&pageSize={}",
                self.base, numeric, index, PAGE_SIZE
            );
            let key = SnapshotKey::new("curseforge", &format!("{numeric}-files-{index}"));
            let page: Page<CurseFile> = self.http.get_json(&url, &headers, Some(&key)).await?;
            let received = page.data.len() as u64;
            entries.extend(page.data.into_iter().map(CurseFile::into_entry));

            match page.pagination {
                Some(p) if p.result_count > 0 && p.index + p.result_count < p.total_count => {
                    index = p.index + p.result_count;
                }
                _ => break,
            }
            if received == 0 {
                break;
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::registry_http;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn client(base: &str, dir: &std::path::Path, key: Option<&str>) -> CurseForgeClient {
        CurseForgeClient::new(registry_http(base, dir), base, key.map(str::to_string))
    }

    #[test]
    fn splits_loaders_from_game_versions() {
        let raw = ["1.21.5", "Fabric", "Client", "NeoForge", "1.21.4", "Java 21"]
            .map(String::from);
        let (loaders, games) = split_game_versions(&raw);
        assert_eq!(loaders, vec!["fabric", "neoforge"]);
        assert_eq!(games, vec!["1.21.5", "1.21.4"]);
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let server = MockServer::start_async().await;
        let any = server
            .mock_async(|when, then| {
                when.path_contains("/v1/");
                then.status(200).body("{}");
            })
            .await;

        let dir = tempdir().unwrap();
        let client = client(&server.base_url(), dir.path(), None);
        let err = client.versions("jei").await.unwrap_err();

        assert!(err.is_configuration());
        assert!(err.to_string().contains("CURSEFORGE_API_KEY"));
        assert_eq!(any.hits_async().await, 0);
    }

    #[tokio::test]
    async fn resolves_slug_preferring_exact_match() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/mods/search")
                    .query_param("gameId", "432")
                    .query_param("searchFilter", "jei")
                    .header("x-api-key", "secret");
                then.status(200).json_body(json!({
                    "data": [
                        {"id": 1, "name": "JEI Addon", "slug": "jei-addon"},
                        {"id": 238222, "name": "JEI", "slug": "jei"}
                    ]
                }));
            })
            .await;

        let dir = tempdir().unwrap();
        let client = client(&server.base_url(), dir.path(), Some("secret"));

        assert_eq!(client.resolve_project_id("jei").await.unwrap(), 238222);
        assert_eq!(
            client
                .resolve_project_id("https://www.curseforge.com/minecraft/mc-mods/jei")
                .await
                .unwrap(),
            238222
        );
        assert_eq!(client.resolve_project_id("12345").await.unwrap(), 12345);
        // the second lookup is answered by the snapshot
        search.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn pages_through_files() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/mods/77/files").query_param("index", "0");
                then.status(200).json_body(json!({
                    "data": [{
                        "id": 5001234,
                        "displayName": "mod-2.0.0",
                        "fileName": "mod-2.0.0.jar",
                        "fileDate": "2025-05-01T00:00:00Z",
                        "downloadUrl": null,
                        "gameVersions": ["1.21.5", "Fabric"],
                        "dependencies": [
                            {"modId": 306612, "relationType": 3},
                            {"modId": 42, "relationType": 2},
                            {"modId": 43, "relationType": 9}
                        ],
                        "hashes": [{"value": "md5hash", "algo": 2}, {"value": "sha1hash", "algo": 1}],
                        "fileLength": 99
                    }],
                    "pagination": {"index": 0, "pageSize": 1, "resultCount": 1, "totalCount": 2}
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/mods/77/files").query_param("index", "1");
                then.status(200).json_body(json!({
                    "data": [{
                        "id": 42,
                        "displayName": "mod-1.0.0",
                        "fileName": "mod-1.0.0.jar",
                        "downloadUrl": "https://cdn/mod-1.0.0.jar",
                        "gameVersions": ["1.21.4", "Forge"]
                    }],
                    "pagination": {"index": 1, "pageSize": 1, "resultCount": 1, "totalCount": 2}
                }));
            })
            .await;

        let dir = tempdir().unwrap();
        let client = client(&server.base_url(), dir.path(), Some("secret"));
        let files = client.versions("77").await.unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(
            files[0].url,
            "https://edge.forgecdn.net/files/5001/234/mod-2.0.0.jar"
        );
        assert_eq!(files[0].hash.as_deref(), Some("sha1hash"));
        assert_eq!(files[0].dependencies.len(), 2);
        assert_eq!(files[0].dependencies[0].kind, RelationKind::Required);
        assert_eq!(files[1].loaders, vec!["forge"]);
    }
}
