use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use super::{
    Dependency, ProjectMetadata, RegistryError, RegistryHttp, RelationKind, SnapshotKey,
    VersionEntry, VersionRegistry,
};
use crate::record::Host;

#[derive(Debug, Deserialize)]
struct ModrinthProject {
    id: String,
    slug: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    project_type: String,
    #[serde(default)]
    client_side: String,
    #[serde(default)]
    server_side: String,
}

#[derive(Debug, Deserialize)]
struct ModrinthVersion {
    id: String,
    version_number: String,
    #[serde(default)]
    loaders: Vec<String>,
    #[serde(default)]
    game_versions: Vec<String>,
    #[serde(default)]
    dependencies: Vec<ModrinthDependency>,
    #[serde(default)]
    files: Vec<ModrinthFile>,
    date_published: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ModrinthDependency {
    project_id: Option<String>,
    dependency_type: String,
}

#[derive(Debug, Deserialize)]
struct ModrinthFile {
    url: String,
    filename: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    hashes: HashMap<String, String>,
    size: Option<u64>,
}

fn relation(kind: &str) -> Option<RelationKind> {
    match kind {
        "required" => Some(RelationKind::Required),
        "optional" => Some(RelationKind::Optional),
        "incompatible" => Some(RelationKind::Incompatible),
        "embedded" => Some(RelationKind::Embedded),
        _ => None,
    }
}

impl ModrinthVersion {
    fn into_entry(self) -> Option<VersionEntry> {
        let primary = self.files.iter().position(|f| f.primary).unwrap_or(0);
        let file = self.files.into_iter().nth(primary)?;
        let hash = file
            .hashes
            .get("sha512")
            .or_else(|| file.hashes.get("sha1"))
            .cloned();
        let dependencies = self
            .dependencies
            .into_iter()
            .filter_map(|d| {
                Some(Dependency {
                    id: d.project_id?,
                    kind: relation(&d.dependency_type)?,
                })
            })
            .collect();

        Some(VersionEntry {
            id: self.id,
            version: self.version_number,
            loaders: self.loaders.into_iter().map(|l| l.to_ascii_lowercase()).collect(),
            game_versions: self.game_versions,
            url: file.url,
            filename: file.filename,
            dependencies,
            published: self.date_published,
            hash,
            size: file.size,
        })
    }
}

/// Client for the Modrinth v2 API.
#[derive(Debug, Clone)]
pub struct ModrinthClient {
    http: RegistryHttp,
    base: String,
}

impl ModrinthClient {
    pub fn new(http: RegistryHttp, base: &str) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl VersionRegistry for ModrinthClient {
    fn host(&self) -> Host {
        Host::Modrinth
    }

    async fn project(&self, id: &str) -> Result<ProjectMetadata, RegistryError> {
        let url = format!("{}/v2/project/{}", self.base, id);
        let key = SnapshotKey::new("modrinth", id);
        let project: ModrinthProject = self.http.get_json(&url, &[], Some(&key)).await?;

        let kind = if project.project_type.is_empty() {
            "mod"
        } else {
            project.project_type.as_str()
        };
        Ok(ProjectMetadata {
            project_url: format!("https://modrinth.com/{}/{}", kind, project.slug),
            client_side: project.client_side.parse().unwrap_or_default(),
            server_side: project.server_side.parse().unwrap_or_default(),
            id: project.id,
            slug: project.slug,
            title: project.title,
            description: project.description,
        })
    }

    async fn versions(&self, id: &str) -> Result<Vec<VersionEntry>, RegistryError> {
        let url = format!("{}/v2/project/{}/version", self.base, id);
        let key = SnapshotKey::new("modrinth", &format!("{id}-versions"));
        let versions: Vec<ModrinthVersion> = self.http.get_json(&url, &[], Some(&key)).await?;
        Ok(versions
            .into_iter()
            .filter_map(ModrinthVersion::into_entry)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::registry_http;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn fetches_project_metadata() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/project/sodium");
                then.status(200).json_body(json!({
                    "id": "AANobbMI",
                    "slug": "sodium",
                    "title": "Sodium",
                    "description": "Rendering engine",
                    "project_type": "mod",
                    "client_side": "required",
                    "server_side": "unsupported"
                }));
            })
            .await;

        let dir = tempdir().unwrap();
        let client = ModrinthClient::new(registry_http(&server.base_url(), dir.path()), &server.base_url());
        let project = client.project("sodium").await.unwrap();

        assert_eq!(project.id, "AANobbMI");
        assert_eq!(project.title, "Sodium");
        assert_eq!(project.project_url, "https://modrinth.com/mod/sodium");
        assert_eq!(project.server_side, crate::record::SideSupport::Unsupported);
    }

    #[tokio::test]
    async fn normalises_versions_and_dependencies() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/project/sodium/version");
                then.status(200).json_body(json!([
                    {
                        "id": "v2",
                        "version_number": "0.6.0",
                        "loaders": ["Fabric", "quilt"],
                        "game_versions": ["1.21.5", "1.21.4"],
                        "date_published": "2025-04-01T10:00:00Z",
                        "dependencies": [
                            {"project_id": "P7dR8mSH", "dependency_type": "required"},
                            {"project_id": "iris", "dependency_type": "incompatible"},
                            {"project_id": null, "version_id": "x", "dependency_type": "optional"}
                        ],
                        "files": [
                            {"url": "https://cdn/sources.jar", "filename": "sources.jar", "primary": false, "hashes": {}},
                            {"url": "https://cdn/sodium-0.6.0.jar", "filename": "sodium-0.6.0.jar", "primary": true,
                             "hashes": {"sha1": "aa", "sha512": "bb"}, "size": 10}
                        ]
                    },
                    {
                        "id": "empty",
                        "version_number": "0.0.1",
                        "files": []
                    }
                ]));
            })
            .await;

        let dir = tempdir().unwrap();
        let client = ModrinthClient::new(registry_http(&server.base_url(), dir.path()), &server.base_url());
        let versions = client.versions("sodium").await.unwrap();

        assert_eq!(versions.len(), 1);
        let entry = &versions[0];
        assert_eq!(entry.version, "0.6.0");
        assert_eq!(entry.loaders, vec!["fabric", "quilt"]);
        assert_eq!(entry.filename, "sodium-0.6.0.jar");
        assert_eq!(entry.hash.as_deref(), Some("bb"));
        assert_eq!(entry.dependencies.len(), 2);
        assert_eq!(entry.dependencies[1].kind, RelationKind::Incompatible);
        assert!(entry.published.is_some());
    }

    #[tokio::test]
    async fn missing_project_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/project/nope");
                then.status(404);
            })
            .await;

        let dir = tempdir().unwrap();
        let client = ModrinthClient::new(registry_http(&server.base_url(), dir.path()), &server.base_url());
        assert!(client.project("nope").await.unwrap_err().is_not_found());
    }
}
