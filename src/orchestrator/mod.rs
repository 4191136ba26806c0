//! Batch download of a whole record set into version-organised folders.
//!
//! Records are processed one at a time in store order. A record's failure
//! becomes a `Failed` row; only local filesystem preconditions and an
//! unreadable store abort the batch.

mod cache;
mod consensus;
mod report;

pub use cache::{ArtifactCache, CachedArtifact, cache_key, host_dir};
pub use consensus::consensus_game_version;
pub use report::{BatchReport, DownloadResult, DownloadStatus, MissingSystemFile, ReportError};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::filesystem::{self, FilesystemError};
use crate::http;
use crate::path_policy;
use crate::record::{Host, ModRecord, ModType, VersionFamily, VersionSlot};
use crate::registry::RegistryError;
use crate::resolver::{ResolveRequest, Resolver, VersionSelector};
use crate::store::{RecordSet, RecordStore, StoreError};

/// Conditions that stop a batch before any record is processed.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("record store: {0}")]
    Store(#[from] StoreError),
    #[error("cannot create {}: {source}", .path.display())]
    Root {
        path: PathBuf,
        #[source]
        source: FilesystemError,
    },
    #[error("cannot set up registry clients: {0}")]
    Setup(#[from] RegistryError),
}

/// Caller intent for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOptions {
    pub family: VersionFamily,
    /// Re-download even when the destination already exists.
    pub force: bool,
    /// Overrides the consensus (or per-record) game version.
    pub game_version: Option<String>,
    /// Write URLs resolved through a registry back into the records.
    pub update_records: bool,
    /// Where to write the results table, if anywhere.
    pub results_path: Option<PathBuf>,
}

/// Lifecycle of a single record within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Pending,
    ResolvingUrl,
    ResolvedDirect,
    ResolvedViaApi,
    Downloading,
    Succeeded,
    Skipped,
    Failed,
}

struct Progress<'a> {
    name: &'a str,
    state: RecordState,
}

impl<'a> Progress<'a> {
    fn new(name: &'a str) -> Self {
        Self {
            name,
            state: RecordState::Pending,
        }
    }

    fn advance(&mut self, next: RecordState) {
        debug!("{}: {:?} -> {:?}", self.name, self.state, next);
        self.state = next;
    }
}

/// Where a record's bytes come from.
#[derive(Debug, Clone)]
struct DownloadPlan {
    url: String,
    version: String,
    hash: Option<String>,
    /// Fixed name for artifacts whose URL does not end in one (Fabric server launcher).
    filename: Option<String>,
    /// Slot values to persist when the URL came from a registry.
    resolved: Option<VersionSlot>,
}

enum SystemRow {
    Process,
    HandledBySibling,
    Missing,
}

/// Game version a system row stands for: its slot's value, else the current one.
fn row_game_version(record: &ModRecord, family: VersionFamily) -> &str {
    let slot = record.slot(family).game_version.trim();
    if slot.is_empty() {
        record.current.game_version.trim()
    } else {
        slot
    }
}

fn system_row(record: &ModRecord, records: &[ModRecord], family: VersionFamily, target: &str) -> SystemRow {
    if row_game_version(record, family) == target {
        return SystemRow::Process;
    }
    let sibling = records.iter().any(|other| {
        other.name == record.name
            && other.mod_type == record.mod_type
            && row_game_version(other, family) == target
    });
    if sibling {
        SystemRow::HandledBySibling
    } else {
        SystemRow::Missing
    }
}

fn first_non_empty<'a>(candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().copied().map(str::trim).find(|c| !c.is_empty())
}

fn result_row(
    record: &ModRecord,
    status: DownloadStatus,
    version: &str,
    path: Option<&Path>,
    size: Option<u64>,
    error: &str,
) -> DownloadResult {
    DownloadResult {
        name: record.display_name().to_string(),
        status,
        version: version.to_string(),
        file: path
            .and_then(|p| p.file_name())
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: path.map(|p| p.display().to_string()).unwrap_or_default(),
        size,
        error: error.to_string(),
        missing_system_file: false,
    }
}

/// Drives batch downloads for one configuration.
#[derive(Debug, Clone)]
pub struct DownloadOrchestrator {
    config: ManagerConfig,
    resolver: Resolver,
    cache: ArtifactCache,
}

/// Per-run state: what has been written during this batch.
#[derive(Debug, Default)]
struct RunState {
    downloaded: HashSet<PathBuf>,
    missing: Vec<MissingSystemFile>,
}

impl DownloadOrchestrator {
    /// Creates an orchestrator for one download root and cache.
    ///
    /// # Arguments
    ///
    /// * `config` - Roots, endpoints, keys and retry policy for the batch.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::Setup` if the HTTP clients cannot be built. Roots
    /// are created when a batch starts, not here.
    pub fn new(config: ManagerConfig) -> Result<Self, BatchError> {
        let resolver = Resolver::new(&config)?;
        let client = http::build_client(&config.user_agent, config.timeout)
            .map_err(|e| RegistryError::Configuration(format!("cannot build HTTP client: {e}")))?;
        let cache = ArtifactCache::new(config.artifact_root(), client, config.retry.clone());
        Ok(Self {
            config,
            resolver,
            cache,
        })
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Loads `store`, runs the batch and, with `update_records`, saves it back.
    pub async fn run<S: RecordStore>(
        &self,
        store: &S,
        options: &BatchOptions,
    ) -> Result<BatchReport, BatchError> {
        let mut set = store.load()?;
        let report = self.run_records(&mut set, options).await?;
        if options.update_records {
            store.save(&set)?;
        }
        Ok(report)
    }

    fn prepare_roots(&self) -> Result<usize, BatchError> {
        let mut swept = 0;
        for root in [self.config.download_root.as_path(), self.cache.root()] {
            filesystem::create_if_not_exists(root).map_err(|source| BatchError::Root {
                path: root.to_path_buf(),
                source,
            })?;
            match filesystem::sweep_partial_files(root) {
                Ok(count) => swept += count,
                Err(e) => warn!("Could not sweep partial files below {}: {}", root.display(), e),
            }
        }
        if swept > 0 {
            info!("Removed {} partial files left by an interrupted run", swept);
        }
        Ok(swept)
    }

    /// Runs the batch over an in-memory record set.
    pub async fn run_records(
        &self,
        set: &mut RecordSet,
        options: &BatchOptions,
    ) -> Result<BatchReport, BatchError> {
        let swept = self.prepare_roots()?;
        let family = options.family;

        let target = match family {
            VersionFamily::Current => options.game_version.clone(),
            VersionFamily::Next | VersionFamily::Latest => options
                .game_version
                .clone()
                .or_else(|| consensus_game_version(&set.records, family)),
        };
        info!(
            "Downloading {} records ({} versions) for Minecraft {}",
            set.records.len(),
            family,
            target.as_deref().unwrap_or("per-record game versions")
        );

        let mut state = RunState::default();
        let mut results = Vec::with_capacity(set.records.len());
        let mut updates = Vec::new();

        for (index, record) in set.records.iter().enumerate() {
            let (result, resolved) = self
                .process_record(record, &set.records, options, target.as_deref(), &mut state)
                .await;
            if let Some(slot) = resolved {
                updates.push((index, slot));
            }
            results.push(result);
        }

        if options.update_records {
            for (index, slot) in updates {
                let record = &mut set.records[index];
                *record.slot_mut(family) = slot;
                record.refresh_hash();
            }
        }

        let report = BatchReport {
            game_version: target,
            results,
            missing_system_files: state.missing,
            swept_partials: swept,
        };

        if let Some(path) = &options.results_path {
            if let Err(e) = report.write_csv(path) {
                warn!("Could not write results to {}: {}", path.display(), e);
            }
        }
        info!("{}", report);
        Ok(report)
    }

    async fn process_record(
        &self,
        record: &ModRecord,
        records: &[ModRecord],
        options: &BatchOptions,
        target: Option<&str>,
        state: &mut RunState,
    ) -> (DownloadResult, Option<VersionSlot>) {
        let family = options.family;
        let mut progress = Progress::new(record.display_name());

        if family != VersionFamily::Current && record.mod_type.is_system() {
            if let Some(target) = target {
                match system_row(record, records, family, target) {
                    SystemRow::Process => {}
                    SystemRow::HandledBySibling => {
                        progress.advance(RecordState::Skipped);
                        let reason = format!("Handled by sibling row for {target}");
                        let version = &record.slot(family).version;
                        return (result_row(record, DownloadStatus::Skipped, version, None, None, &reason), None);
                    }
                    SystemRow::Missing => {
                        let already = state.missing.iter().any(|m| {
                            m.name == record.display_name() && m.mod_type == record.mod_type
                        });
                        if !already {
                            warn!(
                                "No {} row named {} for Minecraft {}",
                                record.mod_type,
                                record.display_name(),
                                target
                            );
                            state.missing.push(MissingSystemFile {
                                name: record.display_name().to_string(),
                                mod_type: record.mod_type,
                                game_version: target.to_string(),
                            });
                        }
                        progress.advance(RecordState::Failed);
                        let reason = format!("Missing system file for Minecraft {target}");
                        let mut row = result_row(record, DownloadStatus::Failed, "", None, None, &reason);
                        row.missing_system_file = true;
                        return (row, None);
                    }
                }
            }
        }

        let Some(game_version) = self.game_version_for(record, family, target) else {
            progress.advance(RecordState::Failed);
            let reason = format!("No {family} game version to download for");
            return (result_row(record, DownloadStatus::Failed, "", None, None, &reason), None);
        };

        // The Jar column names the current file, so an existing copy is known offline.
        let pinned_jar = record.jar.trim();
        if !pinned_jar.is_empty() && !path_policy::is_plain_segment(pinned_jar) {
            warn!(
                "Ignoring Jar '{}' of {}: not a plain filename",
                pinned_jar,
                record.display_name()
            );
        }
        let pinned_dest = (family == VersionFamily::Current && !options.force)
            .then(|| {
                path_policy::destination(
                    &self.config.download_root,
                    &game_version,
                    record.mod_type,
                    record.group,
                    pinned_jar,
                )
            })
            .flatten();
        if let Some(dest) = pinned_dest {
            if let Some(size) = self.trusted_existing(&dest, None, state) {
                progress.advance(RecordState::Skipped);
                let version = &record.current.version;
                return (
                    result_row(record, DownloadStatus::Skipped, version, Some(dest.as_path()), Some(size), "File already exists"),
                    None,
                );
            }
        }

        progress.advance(RecordState::ResolvingUrl);
        let plan = match self.plan(record, records, family, &game_version).await {
            Ok(plan) => plan,
            Err(error) => {
                progress.advance(RecordState::Failed);
                return (result_row(record, DownloadStatus::Failed, "", None, None, &error), None);
            }
        };
        progress.advance(if plan.resolved.is_some() {
            RecordState::ResolvedViaApi
        } else {
            RecordState::ResolvedDirect
        });

        let filename = plan
            .filename
            .clone()
            .filter(|name| path_policy::is_plain_segment(name))
            .unwrap_or_else(|| path_policy::select_filename(record, family, &plan.url, &plan.version));
        let Some(dest) = path_policy::destination(
            &self.config.download_root,
            &game_version,
            record.mod_type,
            record.group,
            &filename,
        ) else {
            progress.advance(RecordState::Failed);
            let reason = format!("Refusing to write {game_version}/{filename} outside the download root");
            return (result_row(record, DownloadStatus::Failed, &plan.version, None, None, &reason), None);
        };

        if !options.force {
            if let Some(size) = self.trusted_existing(&dest, Some((plan.url.as_str(), filename.as_str())), state) {
                progress.advance(RecordState::Skipped);
                return (
                    result_row(record, DownloadStatus::Skipped, &plan.version, Some(dest.as_path()), Some(size), "File already exists"),
                    plan.resolved,
                );
            }
        }

        progress.advance(RecordState::Downloading);
        match self.download(&plan, &filename, &dest).await {
            Ok(size) => {
                state.downloaded.insert(dest.clone());
                progress.advance(RecordState::Succeeded);
                (
                    result_row(record, DownloadStatus::Success, &plan.version, Some(dest.as_path()), Some(size), ""),
                    plan.resolved,
                )
            }
            Err(error) => {
                warn!("Download of {} failed: {}", record.display_name(), error);
                progress.advance(RecordState::Failed);
                (
                    result_row(record, DownloadStatus::Failed, &plan.version, Some(dest.as_path()), None, &error),
                    None,
                )
            }
        }
    }

    fn game_version_for(
        &self,
        record: &ModRecord,
        family: VersionFamily,
        target: Option<&str>,
    ) -> Option<String> {
        let candidates = match family {
            VersionFamily::Current => vec![target.unwrap_or(""), record.current.game_version.as_str()],
            VersionFamily::Next | VersionFamily::Latest => vec![
                target.unwrap_or(""),
                record.slot(family).game_version.as_str(),
                record.latest.game_version.as_str(),
                record.current.game_version.as_str(),
            ],
        };
        first_non_empty(&candidates).map(str::to_string)
    }

    /// Size of `dest` when it can be trusted as a finished download from an
    /// earlier run. Files written during this run are never skipped.
    fn trusted_existing(
        &self,
        dest: &Path,
        source: Option<(&str, &str)>,
        state: &RunState,
    ) -> Option<u64> {
        if state.downloaded.contains(dest) {
            return None;
        }
        let size = filesystem::file_len(dest)?;
        if size == 0 {
            warn!("{} is empty, downloading it again", dest.display());
            return None;
        }
        if let Some((url, filename)) = source {
            if let Some(cached) = self.cache.cached_size(url, filename) {
                if cached != size {
                    warn!(
                        "{} is {} bytes but the cached download is {}, replacing it",
                        dest.display(),
                        size,
                        cached
                    );
                    return None;
                }
            }
        }
        Some(size)
    }

    async fn plan(
        &self,
        record: &ModRecord,
        records: &[ModRecord],
        family: VersionFamily,
        game_version: &str,
    ) -> Result<DownloadPlan, String> {
        let slot = record.slot(family);

        if record.mod_type.is_system() {
            let url = record.url_direct.trim();
            if !url.is_empty() {
                return Ok(DownloadPlan {
                    url: url.to_string(),
                    version: first_non_empty(&[slot.version.as_str(), record.current.version.as_str()])
                        .unwrap_or_default()
                        .to_string(),
                    hash: None,
                    filename: None,
                    resolved: None,
                });
            }
            if record.mod_type != ModType::Server {
                return Err(format!("{} rows need a UrlDirect", record.mod_type));
            }
            let jar = self
                .resolver
                .resolve_server(&record.loader, game_version)
                .await
                .map_err(|e| format!("server jar for Minecraft {game_version}: {e}"))?;
            return Ok(DownloadPlan {
                url: jar.url,
                version: jar.version,
                hash: jar.hash,
                filename: Some(jar.filename),
                resolved: None,
            });
        }

        if record.host == Host::Direct {
            return first_non_empty(&[
                record.url_direct.as_str(),
                slot.url.as_str(),
                record.url.as_str(),
            ])
                .map(|url| DownloadPlan {
                    url: url.to_string(),
                    version: slot.version.clone(),
                    hash: None,
                    filename: None,
                    resolved: None,
                })
                .ok_or_else(|| "no download URL".to_string());
        }

        let pre_resolved = DownloadPlan {
            url: slot.url.clone(),
            version: slot.version.clone(),
            hash: None,
            filename: None,
            resolved: None,
        };
        let slot_game_version = slot.game_version.trim();
        if !slot.url.trim().is_empty() && (slot_game_version.is_empty() || slot_game_version == game_version) {
            debug!("Using stored {} URL for {}", family, record.display_name());
            return Ok(pre_resolved);
        }

        let selector = match family {
            VersionFamily::Current => VersionSelector::Current,
            VersionFamily::Next | VersionFamily::Latest => VersionSelector::Latest,
        };
        let request = ResolveRequest::for_record(record, selector.clone(), Some(game_version));
        let artifact = self.resolver.resolve(&request, Some(records)).await;
        if artifact.found {
            return Ok(DownloadPlan {
                resolved: Some(VersionSlot {
                    version: artifact.version.clone(),
                    url: artifact.version_url.clone(),
                    game_version: game_version.to_string(),
                }),
                url: artifact.version_url,
                version: artifact.version,
                hash: artifact.hash,
                filename: None,
            });
        }

        if family == VersionFamily::Current {
            return Err(artifact.error.unwrap_or_else(|| "not found".to_string()));
        }

        if !slot.url.trim().is_empty() {
            warn!(
                "{} has no build for Minecraft {}, falling back to its {} build for {}",
                record.display_name(),
                game_version,
                family,
                slot_game_version
            );
            return Ok(pre_resolved);
        }

        let own = self
            .resolver
            .resolve(&ResolveRequest::for_record(record, selector, None), Some(records))
            .await;
        if own.found {
            warn!(
                "{} has no build for Minecraft {}, falling back to its own {} for {}",
                record.display_name(),
                game_version,
                own.version,
                own.game_version
            );
            return Ok(DownloadPlan {
                resolved: Some(VersionSlot {
                    version: own.version.clone(),
                    url: own.version_url.clone(),
                    game_version: own.game_version.clone(),
                }),
                url: own.version_url,
                version: own.version,
                hash: own.hash,
                filename: None,
            });
        }
        Err(artifact.error.unwrap_or_else(|| "not found".to_string()))
    }

    /// Populates the cache entry for the plan's URL, then copies it to `dest`.
    async fn download(&self, plan: &DownloadPlan, filename: &str, dest: &Path) -> Result<u64, String> {
        let cached = self
            .cache
            .fetch(&plan.url, filename, plan.hash.as_deref())
            .await
            .map_err(|e| e.to_string())?;
        if !cached.downloaded {
            debug!("Copying {} from cache", filename);
        }
        filesystem::copy_file(&cached.path, dest, true).map_err(|e| e.to_string())
    }
}
