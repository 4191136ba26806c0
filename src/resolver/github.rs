//! Release and asset selection for GitHub-hosted records.
//!
//! Asset names carry the game version (`name-{version}-{gameVersion}.jar`);
//! there is no registry-side compatibility list, so no relaxation happens here.

use std::cmp::Reverse;

use crate::registry::{Release, ReleaseAsset};

use super::VersionSelector;
use super::matching::{compare_game_versions, is_release_version};

/// Tag without a leading `v`.
pub fn tag_version(tag: &str) -> &str {
    tag.strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag)
}

fn is_auxiliary_jar(name: &str) -> bool {
    ["-sources.jar", "-javadoc.jar", "-dev.jar"]
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

/// Game version encoded after `-{version}-` in a jar asset name.
pub fn asset_game_version<'a>(name: &'a str, version: &str) -> Option<&'a str> {
    let stem = name.strip_suffix(".jar")?;
    let marker = format!("-{version}-");
    let start = stem.rfind(&marker)? + marker.len();
    let tail = &stem[start..];
    is_release_version(tail).then_some(tail)
}

/// Picks the jar for `version`.
///
/// With a game version only `*-{version}-{gameVersion}.jar` qualifies. Without
/// one, `*-{version}.jar` is preferred and any primary jar is the last resort.
pub fn select_asset<'a>(
    release: &'a Release,
    version: &str,
    game_version: Option<&str>,
) -> Option<&'a ReleaseAsset> {
    let jars = || {
        release
            .assets
            .iter()
            .filter(|a| a.name.ends_with(".jar") && !is_auxiliary_jar(&a.name))
    };

    match game_version {
        Some(gv) => {
            let suffix = format!("-{version}-{gv}.jar");
            jars().find(|a| a.name.ends_with(&suffix))
        }
        None => {
            let suffix = format!("-{version}.jar");
            jars()
                .find(|a| a.name.ends_with(&suffix))
                .or_else(|| jars().next())
        }
    }
}

/// Highest game version encoded in any asset name across `releases`.
pub fn highest_asset_game_version(releases: &[Release]) -> Option<String> {
    releases
        .iter()
        .flat_map(|r| {
            let version = tag_version(&r.tag_name);
            r.assets
                .iter()
                .filter_map(move |a| asset_game_version(&a.name, version))
        })
        .max_by(|a, b| compare_game_versions(a, b))
        .map(str::to_string)
}

/// Chooses a release and asset for `selector`, or explains why none fits.
pub fn select_release<'a>(
    releases: &'a [Release],
    selector: &VersionSelector,
    game_version: Option<&str>,
) -> Result<(&'a Release, &'a ReleaseAsset), String> {
    match selector {
        VersionSelector::Exact(requested) => {
            let wanted = tag_version(requested.trim());
            let release = releases
                .iter()
                .find(|r| r.tag_name == requested.trim() || tag_version(&r.tag_name) == wanted)
                .ok_or_else(|| format!("release {requested} not found"))?;
            let asset = select_asset(release, tag_version(&release.tag_name), game_version)
                .ok_or_else(|| match game_version {
                    Some(gv) => format!(
                        "release {} has no asset for Minecraft {}",
                        release.tag_name, gv
                    ),
                    None => format!("release {} has no jar asset", release.tag_name),
                })?;
            Ok((release, asset))
        }
        _ => {
            let mut ordered: Vec<&Release> = releases.iter().collect();
            // Stable before prerelease, newest first, undated last in listing order.
            ordered.sort_by_key(|r| (r.prerelease, Reverse(r.published_at)));
            ordered
                .into_iter()
                .find_map(|release| {
                    select_asset(release, tag_version(&release.tag_name), game_version)
                        .map(|asset| (release, asset))
                })
                .ok_or_else(|| match game_version {
                    Some(gv) => format!("no release provides an asset for Minecraft {gv}"),
                    None => "no release provides a jar asset".to_string(),
                })
        }
    }
}
