use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{ProjectMetadata, RegistryError, RegistryHttp, SnapshotKey};

const PER_PAGE: usize = 100;
const MAX_PAGES: u32 = 10;

#[derive(Debug, Deserialize)]
struct GithubRepo {
    full_name: String,
    name: String,
    description: Option<String>,
    html_url: String,
}

/// A GitHub release and its uploaded assets.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Release {
    pub tag_name: String,
    pub name: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

/// Client for GitHub repositories and their releases.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: RegistryHttp,
    base: String,
    token: Option<String>,
}

fn split_repo(id: &str) -> Result<(&str, &str), RegistryError> {
    match id.trim().split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner, repo))
        }
        _ => Err(RegistryError::NotFound(format!(
            "'{id}' is not an owner/repo GitHub identifier"
        ))),
    }
}

impl GithubClient {
    pub fn new(http: RegistryHttp, base: &str, token: Option<String>) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("accept", "application/vnd.github+json".to_string())];
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            headers.push(("authorization", format!("Bearer {token}")));
        }
        headers
    }

    /// Repository metadata for `owner/repo`.
    pub async fn project(&self, id: &str) -> Result<ProjectMetadata, RegistryError> {
        let (owner, repo) = split_repo(id)?;
        let url = format!("{}/repos/{}/{}", self.base, owner, repo);
        let key = SnapshotKey::new("github", &format!("{owner}-{repo}"));
        let repo: GithubRepo = self.http.get_json(&url, &self.headers(), Some(&key)).await?;

        Ok(ProjectMetadata {
            id: repo.full_name,
            slug: repo.name.clone(),
            title: repo.name,
            description: repo.description.unwrap_or_default(),
            project_url: repo.html_url,
            ..ProjectMetadata::default()
        })
    }

    /// Every published (non-draft) release, newest first as GitHub lists them.
    pub async fn releases(&self, id: &str) -> Result<Vec<Release>, RegistryError> {
        let (owner, repo) = split_repo(id)?;
        let headers = self.headers();

        let mut releases = Vec::new();
        for page in 1..=MAX_PAGES {
            let url = format!(
                "{}/repos/{}/{}/releases?per_page={}&page={}",
                self.base, owner, repo, PER_PAGE, page
            );
            let key = SnapshotKey::new("github", &format!("{owner}-{repo}-releases-{page}"));
            let batch: Vec<Release> = self.http.get_json(&url, &headers, Some(&key)).await?;
            let full_page = batch.len() == PER_PAGE;
            releases.extend(batch.into_iter().filter(|r| !r.draft));
            if !full_page {
                break;
            }
        }
        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::registry_http;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn rejects_malformed_repository_ids() {
        assert!(split_repo("owner/repo").is_ok());
        assert!(split_repo("owner").unwrap_err().is_not_found());
        assert!(split_repo("/repo").is_err());
        assert!(split_repo("a/b/c").is_err());
    }

    #[tokio::test]
    async fn lists_releases_without_drafts() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/acme/widget/releases")
                    .query_param("per_page", "100")
                    .query_param("page", "1")
                    .header("authorization", "Bearer tok");
                then.status(200).json_body(json!([
                    {"tag_name": "v1.1.0", "draft": false, "published_at": "2025-06-01T00:00:00Z",
                     "assets": [{"name": "widget-1.1.0-1.21.6.jar", "browser_download_url": "https://dl/1.1.0", "size": 5}]},
                    {"tag_name": "v2.0.0-wip", "draft": true, "assets": []},
                    {"tag_name": "v1.0.0", "published_at": "2025-05-01T00:00:00Z", "assets": []}
                ]));
            })
            .await;

        let dir = tempdir().unwrap();
        let client = GithubClient::new(
            registry_http(&server.base_url(), dir.path()),
            &server.base_url(),
            Some("tok".to_string()),
        );
        let releases = client.releases("acme/widget").await.unwrap();

        mock.assert_async().await;
        assert_eq!(
            releases.iter().map(|r| r.tag_name.as_str()).collect::<Vec<_>>(),
            vec!["v1.1.0", "v1.0.0"]
        );
        assert_eq!(releases[0].assets[0].size, 5);
    }

    #[tokio::test]
    async fn fetches_repository_metadata() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/acme/widget");
                then.status(200).json_body(json!({
                    "full_name": "acme/widget",
                    "name": "widget",
                    "description": null,
                    "html_url": "https://github.com/acme/widget"
                }));
            })
            .await;

        let dir = tempdir().unwrap();
        let client = GithubClient::new(
            registry_http(&server.base_url(), dir.path()),
            &server.base_url(),
            None,
        );
        let project = client.project("acme/widget").await.unwrap();
        assert_eq!(project.id, "acme/widget");
        assert_eq!(project.project_url, "https://github.com/acme/widget");
        assert_eq!(project.description, "");
    }
}
