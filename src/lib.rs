use tracing_subscriber::EnvFilter;

/// The `config` module holds the explicit configuration threaded through every
/// client: download and cache roots, registry endpoints, API keys, timeouts
/// and the retry policy. Values can be read from the environment.
pub mod config;

/// The `filesystem` module provides helpers for directories, atomic writes
/// through partial files and the cleanup of partial files left by an
/// interrupted run.
pub mod filesystem;

/// The `http` module wraps `reqwest` with a retry policy and streams
/// downloads to disk, verifying published hashes on the way.
pub mod http;

/// The `record` module defines the mod record: one row of the modpack
/// database, its enums, its content hash and identity detection from URLs.
pub mod record;

/// The `store` module loads and saves whole record sets as CSV, keeping
/// column order and unknown columns intact.
pub mod store;

/// The `registry` module contains clients for Modrinth, CurseForge, GitHub
/// releases, Fabric Meta and the Mojang version manifest, with JSON snapshots
/// of their responses.
pub mod registry;

/// The `resolver` module selects a single upstream artifact for a record and
/// a requested version, applying loader and game-version matching and the
/// tie-break rules for ambiguous candidates.
pub mod resolver;

/// The `path_policy` module decides the destination subfolder and filename
/// of an artifact.
pub mod path_policy;

/// The `orchestrator` module runs batch downloads over a record set with a
/// content-addressed cache, skip rules and a results report.
pub mod orchestrator;

/// Installs a `tracing` subscriber honouring `RUST_LOG`.
///
/// Defaults to `info` with debug output for this crate. Calling it more than
/// once is harmless.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,junco_modpack_manager=debug"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
