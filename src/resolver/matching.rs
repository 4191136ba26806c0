//! Candidate selection over a registry's version list.
//!
//! Everything here is pure and order-stable: equal scores keep the registry's
//! own ordering, so repeated resolutions pick the same entry.

use std::cmp::Ordering;
use tracing::info;

use crate::record::ModType;
use crate::registry::VersionEntry;

fn version_key(version: &str) -> Vec<(u64, &str)> {
    version
        .split(['.', '-', '+'])
        .map(|segment| {
            let digits = segment
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(segment.len());
            let number = segment[..digits].parse().unwrap_or(0);
            (number, &segment[digits..])
        })
        .collect()
}

/// Orders version strings numerically segment by segment (`1.21.10 > 1.21.9`).
pub fn compare_game_versions(a: &str, b: &str) -> Ordering {
    version_key(a).cmp(&version_key(b))
}

/// A release-style game version: dot-separated numbers only (`1.21.5`, `26.1`).
pub fn is_release_version(version: &str) -> bool {
    let mut parts = 0;
    for part in version.split('.') {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        parts += 1;
    }
    parts >= 2
}

fn numeric_triple(version: &str) -> Option<(u64, u64, u64)> {
    if !is_release_version(version) {
        return None;
    }
    let mut parts = version.split('.').map(|p| p.parse::<u64>().ok());
    let major = parts.next()??;
    let minor = parts.next()??;
    let patch = parts.next().flatten().unwrap_or(0);
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

/// An artifact declaring `a.b.c` runs on `a.b.d` when `c <= d`.
///
/// Newer patch releases keep older mods working; the reverse is never assumed.
pub fn is_patch_compatible(declared: &str, requested: &str) -> bool {
    match (numeric_triple(declared), numeric_triple(requested)) {
        (Some((a, b, c)), Some((x, y, z))) => a == x && b == y && c <= z,
        _ => false,
    }
}

/// Whether an entry can be used with `loader`.
///
/// Datapacks and loader-less entries fit any loader; an empty loader accepts every entry.
pub fn matches_loader(entry: &VersionEntry, loader: &str, mod_type: ModType) -> bool {
    if loader.is_empty() || mod_type == ModType::Datapack || entry.loaders.is_empty() {
        return true;
    }
    entry
        .loaders
        .iter()
        .any(|l| l.eq_ignore_ascii_case(loader) || l == "datapack")
}

/// Entries supporting `game_version`, falling back to patch-compatible ones.
///
/// Returns the surviving candidates and whether the relaxation was needed.
pub fn filter_by_game_version<'a>(
    candidates: &[&'a VersionEntry],
    game_version: &str,
) -> (Vec<&'a VersionEntry>, bool) {
    let exact: Vec<_> = candidates
        .iter()
        .copied()
        .filter(|e| e.game_versions.iter().any(|g| g == game_version))
        .collect();
    if !exact.is_empty() {
        return (exact, false);
    }
    let relaxed = candidates
        .iter()
        .copied()
        .filter(|e| {
            e.game_versions
                .iter()
                .any(|g| is_patch_compatible(g, game_version))
        })
        .collect();
    (relaxed, true)
}

/// 1000 when `game_version` is the entry's primary version, 100 within the
/// first three, 10 further down, 0 when absent. Patch-compatible versions count
/// at their position when there is no exact listing.
pub fn game_version_priority(entry: &VersionEntry, game_version: &str) -> u32 {
    let index = entry
        .game_versions
        .iter()
        .position(|g| g == game_version)
        .or_else(|| {
            entry
                .game_versions
                .iter()
                .position(|g| is_patch_compatible(g, game_version))
        });
    match index {
        Some(0) => 1000,
        Some(i) if i <= 2 => 100,
        Some(_) => 10,
        None => 0,
    }
}

/// Positional count of equal `.`/`-`/`+` segments between two version strings.
pub fn similarity(candidate: &str, requested: &str) -> u32 {
    candidate
        .split(['.', '-', '+'])
        .zip(requested.split(['.', '-', '+']))
        .filter(|(a, b)| a.eq_ignore_ascii_case(b))
        .count() as u32
}

/// Game-version priority dominates; similarity only separates equal priorities.
pub fn candidate_score(entry: &VersionEntry, requested_version: &str, game_version: Option<&str>) -> u32 {
    let priority = game_version.map_or(0, |g| game_version_priority(entry, g));
    priority * 100 + similarity(&entry.version, requested_version)
}

/// Picks one entry among ambiguous candidates. The first of equal scores wins.
pub fn break_tie<'a>(
    candidates: &[&'a VersionEntry],
    requested_version: &str,
    game_version: Option<&str>,
) -> Option<&'a VersionEntry> {
    let mut best: Option<(&VersionEntry, u32)> = None;
    for &candidate in candidates {
        let score = candidate_score(candidate, requested_version, game_version);
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((candidate, score));
        }
    }

    let (chosen, score) = best?;
    if candidates.len() > 1 {
        info!(
            "Ambiguous match for '{}' ({} candidates, Minecraft {}): chose {} [{}] with score {}",
            requested_version,
            candidates.len(),
            game_version.unwrap_or("any"),
            chosen.version,
            chosen.id,
            score
        );
    }
    Some(chosen)
}

fn strip_v(version: &str) -> &str {
    version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version)
}

/// Narrows to loader matches when at least one exists.
fn prefer_loader<'a>(
    found: Vec<&'a VersionEntry>,
    loader: &str,
    mod_type: ModType,
) -> Vec<&'a VersionEntry> {
    let matching: Vec<_> = found
        .iter()
        .copied()
        .filter(|e| matches_loader(e, loader, mod_type))
        .collect();
    if matching.is_empty() { found } else { matching }
}

/// Matches an explicit version string in increasingly loose steps:
/// exact, without a leading `v`, with the loader appended, then substring
/// (loader-filtered). A step only runs while the previous ones found nothing
/// or more than one entry; the first non-empty result is kept otherwise.
pub fn match_explicit<'a>(
    entries: &'a [VersionEntry],
    requested: &str,
    loader: &str,
    mod_type: ModType,
) -> Vec<&'a VersionEntry> {
    let requested = requested.trim();
    let bare = strip_v(requested);
    let loader = loader.to_ascii_lowercase();

    let exact = |e: &&VersionEntry| e.version == requested;
    let without_v = |e: &&VersionEntry| strip_v(&e.version) == bare;
    let with_loader = |e: &&VersionEntry| {
        !loader.is_empty()
            && [
                format!("{bare}+{loader}"),
                format!("{bare}-{loader}"),
                format!("{loader}-{bare}"),
            ]
            .iter()
            .any(|v| strip_v(&e.version).eq_ignore_ascii_case(v))
    };
    let steps: [&dyn Fn(&&VersionEntry) -> bool; 3] = [&exact, &without_v, &with_loader];

    let mut fallback: Vec<&VersionEntry> = Vec::new();
    for step in steps {
        let found: Vec<_> = entries.iter().filter(|e| step(e)).collect();
        let found = prefer_loader(found, &loader, mod_type);
        if found.len() == 1 {
            return found;
        }
        if fallback.is_empty() {
            fallback = found;
        }
    }

    if !bare.is_empty() {
        let found: Vec<_> = entries
            .iter()
            .filter(|e| e.version.contains(bare) && matches_loader(e, &loader, mod_type))
            .collect();
        if found.len() == 1 || (fallback.is_empty() && !found.is_empty()) {
            return found;
        }
    }
    fallback
}

/// The most recently published candidate; entries sharing its version string
/// go through [`break_tie`].
pub fn select_latest<'a>(
    candidates: &[&'a VersionEntry],
    game_version: Option<&str>,
) -> Option<&'a VersionEntry> {
    let mut newest: Option<&VersionEntry> = None;
    for &candidate in candidates {
        let newer = match newest {
            None => true,
            Some(current) => candidate.published > current.published,
        };
        if newer {
            newest = Some(candidate);
        }
    }
    let newest = newest?;
    let siblings: Vec<_> = candidates
        .iter()
        .copied()
        .filter(|e| e.version == newest.version)
        .collect();
    break_tie(&siblings, &newest.version, game_version)
}

/// Highest release-style game version any entry declares.
pub fn highest_game_version<'a, I>(entries: I) -> Option<String>
where
    I: IntoIterator<Item = &'a VersionEntry>,
{
    entries
        .into_iter()
        .flat_map(|e| e.game_versions.iter())
        .filter(|g| is_release_version(g))
        .max_by(|a, b| compare_game_versions(a, b))
        .cloned()
}

/// The version an entry should be filed under when no game version was requested.
pub fn primary_game_version(entry: &VersionEntry) -> String {
    highest_game_version(std::iter::once(entry))
        .or_else(|| entry.game_versions.first().cloned())
        .unwrap_or_default()
}
