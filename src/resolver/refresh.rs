use tracing::{debug, info, warn};

use crate::record::{Host, ModRecord, SideSupport, VersionFamily, VersionSlot};
use crate::registry::{ProjectMetadata, RegistryError};
use crate::store::{DanglingDependency, RecordSet};

use super::{ResolveRequest, ResolvedArtifact, Resolver, VersionSelector};

/// What one refresh changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Content (and so `RecordHash`) differs from before the refresh.
    pub changed: bool,
    /// Per-slot resolution failures, e.g. `"next: no versions of x for Minecraft 1.21.6"`.
    pub errors: Vec<String>,
}

/// Result of [`Resolver::refresh_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub changed: usize,
    /// `(record id, error)` for every slot that could not be resolved.
    pub failures: Vec<(String, String)>,
    /// Records whose stored hash showed edits made outside the manager.
    pub external_edits: Vec<String>,
    pub dangling: Vec<DanglingDependency>,
}

fn write_slot(slot: &mut VersionSlot, artifact: &ResolvedArtifact) {
    slot.version = artifact.version.clone();
    slot.url = artifact.version_url.clone();
    if slot.game_version.is_empty() {
        slot.game_version = artifact.game_version.clone();
    }
}

fn apply_metadata(record: &mut ModRecord, project: &ProjectMetadata) {
    if !project.title.is_empty() {
        record.title = project.title.clone();
    }
    if !project.project_url.is_empty() {
        record.project_url = project.project_url.clone();
    }
    if project.client_side != SideSupport::Unspecified {
        record.client_side = project.client_side;
    }
    if project.server_side != SideSupport::Unspecified {
        record.server_side = project.server_side;
    }
}

impl Resolver {
    async fn project_metadata(&self, record: &ModRecord) -> Result<ProjectMetadata, RegistryError> {
        match record.host {
            Host::GitHub => self.registries.github.project(&record.id).await,
            host => match self.registries.version_registry(host) {
                Some(registry) => registry.project(&record.id).await,
                None => Err(RegistryError::NotFound(format!("no registry for {}", record.id))),
            },
        }
    }

    /// Re-resolves the three version slots of a registry-hosted record and
    /// writes back versions, URLs, dependency buckets and project metadata.
    ///
    /// Direct and system records are left untouched. `RecordHash` is always
    /// recomputed afterwards.
    pub async fn refresh_record(&self, record: &mut ModRecord) -> RefreshOutcome {
        let before = record.compute_hash();
        let mut errors = Vec::new();

        if record.host == Host::Direct || record.mod_type.is_system() {
            debug!("{} is not registry-hosted, nothing to refresh", record.display_name());
        } else {
            match self.project_metadata(record).await {
                Ok(project) => apply_metadata(record, &project),
                Err(e) => errors.push(format!("metadata: {e}")),
            }

            let current = self
                .resolve_slot(record, VersionFamily::Current, &mut errors)
                .await;
            if let Some(artifact) = current {
                write_slot(&mut record.current, &artifact);
                record.jar = artifact.jar.clone();
                record.current_dependencies.required = artifact.required_dependencies();
                record.current_dependencies.optional = artifact.optional_dependencies();
            }

            if !record.next.game_version.is_empty() {
                if let Some(artifact) = self.resolve_slot(record, VersionFamily::Next, &mut errors).await {
                    write_slot(&mut record.next, &artifact);
                }
            }

            if let Some(artifact) = self.resolve_slot(record, VersionFamily::Latest, &mut errors).await {
                record.latest.version = artifact.version.clone();
                record.latest.url = artifact.version_url.clone();
                record.latest.game_version = if artifact.latest_game_version.is_empty() {
                    artifact.game_version.clone()
                } else {
                    artifact.latest_game_version.clone()
                };
                record.latest_dependencies.required = artifact.required_dependencies();
                record.latest_dependencies.optional = artifact.optional_dependencies();
            }
        }

        record.refresh_hash();
        let changed = record.record_hash != before;
        if changed {
            debug!("Refreshed {}", record.display_name());
        }
        RefreshOutcome { changed, errors }
    }

    async fn resolve_slot(
        &self,
        record: &ModRecord,
        family: VersionFamily,
        errors: &mut Vec<String>,
    ) -> Option<ResolvedArtifact> {
        let slot = record.slot(family);
        let (selector, game_version) = match family {
            VersionFamily::Current => (
                match slot.version.parse::<VersionSelector>() {
                    Ok(exact @ VersionSelector::Exact(_)) => exact,
                    _ => VersionSelector::Latest,
                },
                Some(slot.game_version.as_str()),
            ),
            VersionFamily::Next => (VersionSelector::Latest, Some(slot.game_version.as_str())),
            VersionFamily::Latest => (VersionSelector::Latest, None),
        };

        let request = ResolveRequest::for_record(record, selector, game_version);
        let artifact = self.resolve(&request, None).await;
        if artifact.found {
            Some(artifact)
        } else {
            let error = artifact.error.unwrap_or_else(|| "not found".to_string());
            errors.push(format!("{family}: {error}"));
            None
        }
    }

    /// Refreshes every record in order, then reports dependency IDs that
    /// point at no record.
    pub async fn refresh_all(&self, set: &mut RecordSet) -> RefreshSummary {
        let mut summary = RefreshSummary::default();

        for record in set.records.iter_mut() {
            if record.has_external_edits() {
                info!("{} was edited outside the manager", record.display_name());
                summary.external_edits.push(record.id.clone());
            }
            let outcome = self.refresh_record(record).await;
            summary.refreshed += 1;
            if outcome.changed {
                summary.changed += 1;
            }
            summary
                .failures
                .extend(outcome.errors.into_iter().map(|e| (record.id.clone(), e)));
        }

        summary.dangling = set.dangling_dependencies();
        for dangling in &summary.dangling {
            warn!(
                "{} depends on {}, which has no record",
                dangling.record, dangling.dependency
            );
        }
        info!(
            "Refreshed {} records ({} changed, {} failures)",
            summary.refreshed,
            summary.changed,
            summary.failures.len()
        );
        summary
    }
}
