use std::collections::HashMap;
use tracing::debug;

use crate::record::{ModRecord, VersionFamily};
use crate::resolver::matching::compare_game_versions;

/// Most common game version in the family's slot across mod-like records.
///
/// System rows are versioned one per game version and would skew the count,
/// so they are left out. Equal counts go to the highest version.
pub fn consensus_game_version(records: &[ModRecord], family: VersionFamily) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in records.iter().filter(|r| !r.mod_type.is_system()) {
        let game_version = record.slot(family).game_version.trim();
        if !game_version.is_empty() {
            *counts.entry(game_version).or_default() += 1;
        }
    }

    let winner = counts
        .iter()
        .max_by(|(a, count_a), (b, count_b)| {
            count_a
                .cmp(count_b)
                .then_with(|| compare_game_versions(a, b))
        })
        .map(|(version, _)| version.to_string());

    if let Some(version) = &winner {
        debug!(
            "Consensus {} game version is {} ({} distinct values)",
            family,
            version,
            counts.len()
        );
    }
    winner
}
