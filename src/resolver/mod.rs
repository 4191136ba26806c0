//! Chooses one upstream artifact for a record and a requested version.
//!
//! Every failure a single resolution can hit is folded into
//! [`ResolvedArtifact::error`]; nothing here aborts a batch.

pub mod github;
pub mod matching;
mod refresh;

pub use refresh::{RefreshOutcome, RefreshSummary};

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::record::{Host, ModRecord, ModType, VersionFamily};
use crate::registry::{
    Dependency, Registries, RegistryError, RelationKind, ServerJar, VersionEntry,
    VersionRegistry,
};

use matching::{
    break_tie, filter_by_game_version, highest_game_version, match_explicit, matches_loader,
    primary_game_version, select_latest,
};

/// Requested version: a literal string or one of the keywords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Exact(String),
    Latest,
    Next,
    Current,
}

impl FromStr for VersionSelector {
    type Err = Infallible;

    /// Keywords are case-insensitive; an empty string means `latest`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "" | "latest" => VersionSelector::Latest,
            "next" => VersionSelector::Next,
            "current" => VersionSelector::Current,
            _ => VersionSelector::Exact(trimmed.to_string()),
        })
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Exact(v) => f.write_str(v),
            VersionSelector::Latest => f.write_str("latest"),
            VersionSelector::Next => f.write_str("next"),
            VersionSelector::Current => f.write_str("current"),
        }
    }
}

impl From<VersionFamily> for VersionSelector {
    fn from(family: VersionFamily) -> Self {
        match family {
            VersionFamily::Current => VersionSelector::Current,
            VersionFamily::Next => VersionSelector::Next,
            VersionFamily::Latest => VersionSelector::Latest,
        }
    }
}

/// Everything needed to resolve one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub id: String,
    pub host: Host,
    pub selector: VersionSelector,
    pub loader: String,
    /// Target game version. `None` accepts any.
    pub game_version: Option<String>,
    pub mod_type: ModType,
}

impl ResolveRequest {
    /// Builds a request from a stored record.
    ///
    /// # Arguments
    ///
    /// * `record` - Supplies ID, host, loader and type.
    /// * `selector` - Which version to pick.
    /// * `game_version` - Minecraft version to match; blank means any.
    ///
    /// # Returns
    ///
    /// The request, with a blank game version normalised to `None`.
    pub fn for_record(
        record: &ModRecord,
        selector: VersionSelector,
        game_version: Option<&str>,
    ) -> Self {
        Self {
            id: record.id.clone(),
            host: record.host,
            selector,
            loader: record.loader.clone(),
            game_version: game_version
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string),
            mod_type: record.mod_type,
        }
    }
}

/// Outcome of one resolution. `found == false` always carries an `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub found: bool,
    pub version: String,
    pub version_url: String,
    pub game_version: String,
    /// Highest game version the project publishes for the record's loader.
    pub latest_game_version: String,
    pub jar: String,
    /// Only `Required` and `Optional` relations survive.
    pub dependencies: Vec<Dependency>,
    pub hash: Option<String>,
    pub size: Option<u64>,
    pub error: Option<String>,
}

impl ResolvedArtifact {
    /// An unresolved artifact carrying `error`.
    pub fn not_found<S: Into<String>>(error: S) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    fn dependency_ids(&self, kind: RelationKind) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for dep in self.dependencies.iter().filter(|d| d.kind == kind) {
            if !ids.contains(&dep.id) {
                ids.push(dep.id.clone());
            }
        }
        ids
    }

    pub fn required_dependencies(&self) -> Vec<String> {
        self.dependency_ids(RelationKind::Required)
    }

    pub fn optional_dependencies(&self) -> Vec<String> {
        self.dependency_ids(RelationKind::Optional)
    }
}

fn normalize_dependencies(dependencies: &[Dependency]) -> Vec<Dependency> {
    dependencies
        .iter()
        .filter(|d| matches!(d.kind, RelationKind::Required | RelationKind::Optional))
        .filter(|d| !d.id.is_empty())
        .cloned()
        .collect()
}

fn describe(error: &RegistryError) -> String {
    match error {
        RegistryError::NotFound(what) => format!("project not found: {what}"),
        other => other.to_string(),
    }
}

/// Resolves records against their registries.
#[derive(Debug, Clone)]
pub struct Resolver {
    registries: Registries,
}

impl Resolver {
    /// Creates a resolver with a client for every registry in `config`.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: &ManagerConfig) -> Result<Self, RegistryError> {
        Ok(Self {
            registries: Registries::new(config)?,
        })
    }

    pub fn from_registries(registries: Registries) -> Self {
        Self { registries }
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Turns `Current` into an explicit version using the record store when one
    /// is available; everything else passes through.
    fn concrete_selector(
        request: &ResolveRequest,
        records: Option<&[ModRecord]>,
    ) -> (VersionSelector, Option<String>) {
        if request.selector != VersionSelector::Current {
            return (request.selector.clone(), request.game_version.clone());
        }

        let record = records.and_then(|rs| {
            rs.iter()
                .find(|r| r.id == request.id && r.host == request.host)
        });
        let Some(record) = record else {
            debug!("No stored record for {}, resolving current as latest", request.id);
            return (VersionSelector::Latest, request.game_version.clone());
        };

        match record.current.version.parse::<VersionSelector>() {
            Ok(VersionSelector::Exact(version)) => {
                let game_version = request.game_version.clone().or_else(|| {
                    Some(record.current.game_version.clone()).filter(|g| !g.is_empty())
                });
                (VersionSelector::Exact(version), game_version)
            }
            _ => (VersionSelector::Latest, request.game_version.clone()),
        }
    }

    /// Resolves one request. Never fails: problems come back as `found == false`.
    pub async fn resolve(
        &self,
        request: &ResolveRequest,
        records: Option<&[ModRecord]>,
    ) -> ResolvedArtifact {
        let (selector, game_version) = Self::concrete_selector(request, records);
        debug!(
            "Resolving {} ({}) {} for Minecraft {}",
            request.id,
            request.host,
            selector,
            game_version.as_deref().unwrap_or("any")
        );

        let outcome = match request.host {
            Host::GitHub => self.resolve_github(request, &selector, game_version.as_deref()).await,
            Host::Direct => Ok(ResolvedArtifact::not_found(format!(
                "{} is a direct record and has no registry to resolve against",
                request.id
            ))),
            host => match self.registries.version_registry(host) {
                Some(registry) => {
                    self.resolve_listed(registry, request, &selector, game_version.as_deref())
                        .await
                }
                None => Ok(ResolvedArtifact::not_found(format!("no registry for host {host}"))),
            },
        };

        match outcome {
            Ok(artifact) => {
                if let Some(error) = &artifact.error {
                    warn!("Could not resolve {}: {}", request.id, error);
                }
                artifact
            }
            Err(e) => {
                if e.is_configuration() {
                    warn!("Configuration error while resolving {}: {}", request.id, e);
                } else if e.is_rate_limited() {
                    warn!("Rate limited while resolving {}: {}", request.id, e);
                } else {
                    warn!("Could not resolve {}: {}", request.id, e);
                }
                ResolvedArtifact::not_found(describe(&e))
            }
        }
    }

    async fn resolve_listed(
        &self,
        registry: &dyn VersionRegistry,
        request: &ResolveRequest,
        selector: &VersionSelector,
        game_version: Option<&str>,
    ) -> Result<ResolvedArtifact, RegistryError> {
        let project = registry.project(&request.id).await?;
        // CurseForge lists files under the numeric ID, whatever the record holds.
        let versions = registry.versions(&project.id).await?;
        if versions.is_empty() {
            return Ok(ResolvedArtifact::not_found(format!(
                "no versions published for {}",
                request.id
            )));
        }

        let by_loader: Vec<&VersionEntry> = versions
            .iter()
            .filter(|v| matches_loader(v, &request.loader, request.mod_type))
            .collect();
        let latest_game_version = highest_game_version(by_loader.iter().copied())
            .or_else(|| highest_game_version(&versions))
            .unwrap_or_default();

        let chosen = match selector {
            VersionSelector::Exact(requested) => {
                if by_loader.is_empty() {
                    return Ok(ResolvedArtifact::not_found(format!(
                        "no {} versions of {}",
                        request.loader, request.id
                    )));
                }
                let matched =
                    match_explicit(&versions, requested, &request.loader, request.mod_type);
                if matched.is_empty() {
                    return Ok(ResolvedArtifact::not_found(format!(
                        "version {} of {} not found",
                        requested, request.id
                    )));
                }
                let pool = match game_version {
                    Some(gv) => {
                        let (pool, relaxed) = filter_by_game_version(&matched, gv);
                        if pool.is_empty() {
                            return Ok(ResolvedArtifact::not_found(format!(
                                "version {} of {} does not support Minecraft {}",
                                requested, request.id, gv
                            )));
                        }
                        if relaxed {
                            info!(
                                "{} {} has no exact Minecraft {} build, using an older patch release",
                                request.id, requested, gv
                            );
                        }
                        pool
                    }
                    None => matched,
                };
                break_tie(&pool, requested, game_version)
            }
            _ => {
                let pool = if by_loader.is_empty() {
                    warn!(
                        "No {} versions of {}, considering every loader",
                        request.loader, request.id
                    );
                    versions.iter().collect()
                } else {
                    by_loader
                };
                let pool = match game_version {
                    Some(gv) => {
                        let (pool, relaxed) = filter_by_game_version(&pool, gv);
                        if pool.is_empty() {
                            return Ok(ResolvedArtifact::not_found(format!(
                                "no versions of {} for Minecraft {}",
                                request.id, gv
                            )));
                        }
                        if relaxed {
                            info!(
                                "{} has no exact Minecraft {} build, using an older patch release",
                                request.id, gv
                            );
                        }
                        pool
                    }
                    None => pool,
                };
                select_latest(&pool, game_version)
            }
        };

        let Some(entry) = chosen else {
            return Ok(ResolvedArtifact::not_found(format!(
                "no acceptable version of {}",
                request.id
            )));
        };

        Ok(ResolvedArtifact {
            found: true,
            version: entry.version.clone(),
            version_url: entry.url.clone(),
            game_version: game_version
                .map(str::to_string)
                .unwrap_or_else(|| primary_game_version(entry)),
            latest_game_version,
            jar: entry.filename.clone(),
            dependencies: normalize_dependencies(&entry.dependencies),
            hash: entry.hash.clone(),
            size: entry.size,
            error: None,
        })
    }

    async fn resolve_github(
        &self,
        request: &ResolveRequest,
        selector: &VersionSelector,
        game_version: Option<&str>,
    ) -> Result<ResolvedArtifact, RegistryError> {
        let repository = self.registries.github.project(&request.id).await?;
        let releases = self.registries.github.releases(&repository.id).await?;
        if releases.is_empty() {
            return Ok(ResolvedArtifact::not_found(format!(
                "no releases published for {}",
                request.id
            )));
        }

        let latest_game_version = github::highest_asset_game_version(&releases).unwrap_or_default();
        let (release, asset) = match github::select_release(&releases, selector, game_version) {
            Ok(found) => found,
            Err(reason) => {
                return Ok(ResolvedArtifact {
                    latest_game_version,
                    ..ResolvedArtifact::not_found(format!("{}: {}", request.id, reason))
                });
            }
        };

        let version = github::tag_version(&release.tag_name);
        Ok(ResolvedArtifact {
            found: true,
            version: version.to_string(),
            version_url: asset.browser_download_url.clone(),
            game_version: game_version
                .or_else(|| github::asset_game_version(&asset.name, version))
                .unwrap_or_default()
                .to_string(),
            latest_game_version,
            jar: asset.name.clone(),
            dependencies: Vec::new(),
            hash: None,
            size: Some(asset.size).filter(|s| *s > 0),
            error: None,
        })
    }

    /// Locates a server jar: Fabric's launcher for the `fabric` loader,
    /// otherwise the vanilla server from the Mojang manifest.
    pub async fn resolve_server(
        &self,
        loader: &str,
        game_version: &str,
    ) -> Result<ServerJar, RegistryError> {
        if loader.eq_ignore_ascii_case("fabric") {
            self.registries.fabric.server_jar(game_version).await
        } else {
            self.registries.mojang.server_jar(game_version).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::config_for;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn resolver(server: &MockServer, dir: &std::path::Path) -> Resolver {
        Resolver::new(&config_for(&server.base_url(), dir)).unwrap()
    }

    fn request(id: &str, host: Host, selector: VersionSelector, gv: Option<&str>) -> ResolveRequest {
        ResolveRequest {
            id: id.to_string(),
            host,
            selector,
            loader: "fabric".to_string(),
            game_version: gv.map(str::to_string),
            mod_type: ModType::Mod,
        }
    }

    async fn modrinth_project(server: &MockServer, versions: serde_json::Value) {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/project/sodium");
                then.status(200).json_body(json!({
                    "id": "AANobbMI",
                    "slug": "sodium",
                    "title": "Sodium",
                    "description": "",
                    "project_type": "mod",
                    "client_side": "required",
                    "server_side": "unsupported"
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/project/AANobbMI/version");
                then.status(200).json_body(versions);
            })
            .await;
    }

    fn modrinth_version(id: &str, number: &str, games: &[&str], date: &str) -> serde_json::Value {
        json!({
            "id": id,
            "version_number": number,
            "loaders": ["fabric"],
            "game_versions": games,
            "date_published": date,
            "dependencies": [
                {"project_id": "P7dR8mSH", "dependency_type": "required"},
                {"project_id": "YL57xq9U", "dependency_type": "incompatible"}
            ],
            "files": [{
                "url": format!("https://cdn.modrinth.com/{id}/sodium-{number}.jar"),
                "filename": format!("sodium-{id}.jar"),
                "primary": true,
                "size": 1234,
                "hashes": {"sha1": "abc"}
            }]
        })
    }

    #[test]
    fn parses_keywords_case_insensitively() {
        assert_eq!("LATEST".parse::<VersionSelector>().unwrap(), VersionSelector::Latest);
        assert_eq!("".parse::<VersionSelector>().unwrap(), VersionSelector::Latest);
        assert_eq!("Next".parse::<VersionSelector>().unwrap(), VersionSelector::Next);
        assert_eq!("current".parse::<VersionSelector>().unwrap(), VersionSelector::Current);
        assert_eq!(
            " 0.6.13 ".parse::<VersionSelector>().unwrap(),
            VersionSelector::Exact("0.6.13".to_string())
        );
    }

    #[tokio::test]
    async fn shared_version_string_prefers_listed_game_version() {
        let server = MockServer::start_async().await;
        modrinth_project(
            &server,
            json!([
                modrinth_version("a", "2.0.0", &["1.21.5", "1.21.6"], "2025-06-01T00:00:00Z"),
                modrinth_version("b", "2.0.0", &["1.21.7"], "2025-06-02T00:00:00Z")
            ]),
        )
        .await;
        let dir = tempdir().unwrap();
        let resolver = resolver(&server, dir.path());

        for selector in [VersionSelector::Latest, VersionSelector::Exact("2.0.0".into())] {
            let artifact = resolver
                .resolve(&request("sodium", Host::Modrinth, selector, Some("1.21.6")), None)
                .await;
            assert!(artifact.found, "{:?}", artifact.error);
            assert_eq!(artifact.jar, "sodium-a.jar");
            assert_eq!(artifact.game_version, "1.21.6");
            assert_eq!(artifact.latest_game_version, "1.21.7");
            assert_eq!(artifact.required_dependencies(), vec!["P7dR8mSH".to_string()]);
            assert!(artifact.optional_dependencies().is_empty());
        }
    }

    #[tokio::test]
    async fn older_patch_release_satisfies_newer_patch_request() {
        let server = MockServer::start_async().await;
        modrinth_project(
            &server,
            json!([
                modrinth_version("future", "3.0.0", &["1.21.6"], "2025-07-01T00:00:00Z"),
                modrinth_version("older", "2.9.0", &["1.21.4"], "2025-05-01T00:00:00Z")
            ]),
        )
        .await;
        let dir = tempdir().unwrap();
        let resolver = resolver(&server, dir.path());

        let artifact = resolver
            .resolve(&request("sodium", Host::Modrinth, VersionSelector::Latest, Some("1.21.5")), None)
            .await;
        assert!(artifact.found);
        assert_eq!(artifact.version, "2.9.0");

        let missing = resolver
            .resolve(&request("sodium", Host::Modrinth, VersionSelector::Latest, Some("1.20.1")), None)
            .await;
        assert!(!missing.found);
        assert!(missing.error.unwrap().contains("1.20.1"));
    }

    #[tokio::test]
    async fn current_uses_the_stored_version() {
        let server = MockServer::start_async().await;
        modrinth_project(
            &server,
            json!([
                modrinth_version("new", "0.7.0", &["1.21.6"], "2025-07-01T00:00:00Z"),
                modrinth_version("old", "0.6.0", &["1.21.6"], "2025-05-01T00:00:00Z")
            ]),
        )
        .await;
        let dir = tempdir().unwrap();
        let resolver = resolver(&server, dir.path());

        let mut record = ModRecord::new("sodium", Host::Modrinth);
        record.current.version = "0.6.0".to_string();
        let records = vec![record];

        let req = request("sodium", Host::Modrinth, VersionSelector::Current, None);
        assert_eq!(resolver.resolve(&req, Some(&records)).await.version, "0.6.0");
        assert_eq!(resolver.resolve(&req, None).await.version, "0.7.0");
    }

    #[tokio::test]
    async fn unknown_project_is_reported_not_thrown() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/project/ghost");
                then.status(404);
            })
            .await;
        let dir = tempdir().unwrap();
        let artifact = resolver(&server, dir.path())
            .resolve(&request("ghost", Host::Modrinth, VersionSelector::Latest, None), None)
            .await;
        assert!(!artifact.found);
        assert!(artifact.error.unwrap().starts_with("project not found"));
    }

    #[tokio::test]
    async fn curseforge_without_key_fails_before_any_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.path_contains("/v1/");
                then.status(200).json_body(json!({"data": []}));
            })
            .await;
        let dir = tempdir().unwrap();
        let artifact = resolver(&server, dir.path())
            .resolve(&request("jei", Host::CurseForge, VersionSelector::Latest, None), None)
            .await;
        assert!(!artifact.found);
        assert!(artifact.error.unwrap().contains("CURSEFORGE_API_KEY"));
        mock.assert_hits_async(0).await;
    }

    async fn github_repository(server: &MockServer) {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/acme/mod");
                then.status(200).json_body(json!({
                    "full_name": "acme/mod",
                    "name": "mod",
                    "description": null,
                    "html_url": "https://github.com/acme/mod"
                }));
            })
            .await;
    }

    #[tokio::test]
    async fn github_explicit_game_version_without_asset_fails() {
        let server = MockServer::start_async().await;
        github_repository(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/acme/mod/releases");
                then.status(200).json_body(json!([
                    {"tag_name": "v1.1.0", "published_at": "2025-06-01T00:00:00Z",
                     "assets": [{"name": "mod-1.1.0-1.21.6.jar", "browser_download_url": "https://dl/b", "size": 2}]},
                    {"tag_name": "v1.0.0", "published_at": "2025-05-01T00:00:00Z",
                     "assets": [{"name": "mod-1.0.0-1.21.5.jar", "browser_download_url": "https://dl/a", "size": 1}]}
                ]));
            })
            .await;
        let dir = tempdir().unwrap();
        let resolver = resolver(&server, dir.path());

        let failed = resolver
            .resolve(
                &request("acme/mod", Host::GitHub, VersionSelector::Exact("1.0.0".into()), Some("1.21.6")),
                None,
            )
            .await;
        assert!(!failed.found);
        assert_eq!(failed.latest_game_version, "1.21.6");

        let found = resolver
            .resolve(
                &request("acme/mod", Host::GitHub, VersionSelector::Exact("v1.0.0".into()), Some("1.21.5")),
                None,
            )
            .await;
        assert!(found.found);
        assert_eq!(found.version, "1.0.0");
        assert_eq!(found.version_url, "https://dl/a");
        assert_eq!(found.latest_game_version, "1.21.6");
    }

    #[tokio::test]
    async fn missing_github_repository_is_project_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/acme/gone");
                then.status(404);
            })
            .await;
        let releases = server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/acme/gone/releases");
                then.status(200).json_body(json!([]));
            })
            .await;
        let dir = tempdir().unwrap();
        let artifact = resolver(&server, dir.path())
            .resolve(&request("acme/gone", Host::GitHub, VersionSelector::Latest, None), None)
            .await;

        assert!(!artifact.found);
        assert!(artifact.error.unwrap().starts_with("project not found"));
        releases.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn keyword_without_loader_match_considers_every_loader() {
        let server = MockServer::start_async().await;
        let forge_only = |id: &str, number: &str, date: &str| {
            let mut version = modrinth_version(id, number, &["1.21.5"], date);
            version["loaders"] = json!(["forge"]);
            version
        };
        modrinth_project(
            &server,
            json!([
                forge_only("f2", "2.0.0", "2025-06-01T00:00:00Z"),
                forge_only("f1", "1.0.0", "2025-05-01T00:00:00Z")
            ]),
        )
        .await;
        let dir = tempdir().unwrap();
        let resolver = resolver(&server, dir.path());

        for selector in [VersionSelector::Latest, VersionSelector::Next] {
            let artifact = resolver
                .resolve(&request("sodium", Host::Modrinth, selector, Some("1.21.5")), None)
                .await;
            assert!(artifact.found, "{:?}", artifact.error);
            assert_eq!(artifact.version, "2.0.0");
            assert_eq!(artifact.jar, "sodium-f2.jar");
        }

        let exact = resolver
            .resolve(
                &request("sodium", Host::Modrinth, VersionSelector::Exact("2.0.0".into()), Some("1.21.5")),
                None,
            )
            .await;
        assert!(!exact.found);
        assert_eq!(exact.error.as_deref(), Some("no fabric versions of sodium"));
    }

    #[test]
    fn direct_records_never_reach_a_registry() {
        let record = ModRecord::new("https://example.com/tool.jar", Host::Direct);
        let req = ResolveRequest::for_record(&record, VersionSelector::Latest, Some(" "));
        assert_eq!(req.game_version, None);
        assert_eq!(req.host, Host::Direct);
    }
}
