use serde::Serialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::filesystem::{self, FilesystemError};
use crate::record::ModType;

const RESULT_COLUMNS: [&str; 7] = ["Name", "Status", "Version", "File", "Path", "Size", "Error"];

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DownloadStatus {
    Success,
    Skipped,
    Failed,
}

/// One row of the results table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DownloadResult {
    pub name: String,
    pub status: DownloadStatus,
    pub version: String,
    pub file: String,
    pub path: String,
    pub size: Option<u64>,
    pub error: String,
    /// Failed because the database has no system row for the target game
    /// version, not because a download went wrong.
    #[serde(skip)]
    pub missing_system_file: bool,
}

/// A system row the database lacks for the batch's game version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingSystemFile {
    pub name: String,
    pub mod_type: ModType,
    pub game_version: String,
}

/// Everything a batch produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Shared game version for the run, when one was chosen.
    pub game_version: Option<String>,
    pub results: Vec<DownloadResult>,
    pub missing_system_files: Vec<MissingSystemFile>,
    /// Leftover partial files removed before the run.
    pub swept_partials: usize,
}

impl BatchReport {
    fn count(&self, status: DownloadStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(DownloadStatus::Success)
    }

    pub fn skipped(&self) -> usize {
        self.count(DownloadStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(DownloadStatus::Failed)
    }

    /// Failed rows other than missing system files.
    pub fn failures(&self) -> impl Iterator<Item = &DownloadResult> {
        self.results
            .iter()
            .filter(|r| r.status == DownloadStatus::Failed && !r.missing_system_file)
    }

    /// Writes the results table, header included even for an empty batch.
    pub fn write_csv(&self, path: &Path) -> Result<(), ReportError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(RESULT_COLUMNS)?;
        for result in &self.results {
            writer.serialize(result)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| FilesystemError::Io(e.into_error()))?;
        filesystem::write_file(path, &bytes)?;
        Ok(())
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Downloaded {} of {} records: {} succeeded, {} skipped, {} failed",
            self.succeeded() + self.skipped(),
            self.results.len(),
            self.succeeded(),
            self.skipped(),
            self.failed()
        )?;
        if let Some(game_version) = &self.game_version {
            write!(f, " (Minecraft {game_version})")?;
        }

        if !self.missing_system_files.is_empty() {
            write!(f, "\nMissing system files (add a database row):")?;
            for missing in &self.missing_system_files {
                write!(
                    f,
                    "\n  {} [{}] for Minecraft {}",
                    missing.name, missing.mod_type, missing.game_version
                )?;
            }
        }

        let mut failures = self.failures().peekable();
        if failures.peek().is_some() {
            write!(f, "\nFailed downloads:")?;
            for failure in failures {
                write!(f, "\n  {}: {}", failure.name, failure.error)?;
            }
        }
        Ok(())
    }
}
