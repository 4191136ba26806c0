use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::filesystem::{self, FilesystemError};
use crate::record::{COLUMNS, ModRecord, RecordError};

/// Errors raised while loading or saving the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid record on row {row}: {source}")]
    Record {
        row: usize,
        #[source]
        source: RecordError,
    },
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Every record of the store plus the column layout it was read with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    /// Header order as loaded; new canonical columns are appended on save.
    pub columns: Vec<String>,
    pub records: Vec<ModRecord>,
}

/// A dependency ID with no matching record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingDependency {
    pub record: String,
    pub dependency: String,
}

impl RecordSet {
    /// Wraps records in a set laid out with the canonical columns.
    pub fn new(records: Vec<ModRecord>) -> Self {
        Self {
            columns: COLUMNS.iter().map(|c| c.to_string()).collect(),
            records,
        }
    }

    /// First record whose `ID` equals `id`.
    pub fn find(&self, id: &str) -> Option<&ModRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut ModRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    /// Columns to write: loaded order first, then canonical and extra columns
    /// that were not part of the original header.
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns = self.columns.clone();
        let canonical = COLUMNS.iter().map(|c| c.to_string());
        let extra = self.records.iter().flat_map(|r| r.extra.keys().cloned());
        for column in canonical.chain(extra) {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }

    /// Dependency references that point at no record, in record order.
    ///
    /// These are tolerated; callers report them.
    pub fn dangling_dependencies(&self) -> Vec<DanglingDependency> {
        let mut dangling = Vec::new();
        for record in &self.records {
            for dependency in record.dependency_ids() {
                let known = self
                    .records
                    .iter()
                    .any(|r| r.id == dependency || r.name == dependency);
                let already = dangling.iter().any(|d: &DanglingDependency| {
                    d.record == record.id && d.dependency == dependency
                });
                if !known && !already {
                    dangling.push(DanglingDependency {
                        record: record.id.clone(),
                        dependency: dependency.to_string(),
                    });
                }
            }
        }
        dangling
    }
}

/// Whole-set persistence of mod records.
pub trait RecordStore {
    /// Reads the whole set, preserving row and column order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read or a row does not parse.
    fn load(&self) -> Result<RecordSet, StoreError>;

    /// Replaces the stored set with `set`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the set cannot be serialised or written.
    fn save(&self, set: &RecordSet) -> Result<(), StoreError>;
}

/// Record store backed by a single CSV file with a header row.
#[derive(Debug, Clone)]
pub struct CsvRecordStore {
    path: PathBuf,
}

impl CsvRecordStore {
    /// Store reading and writing the CSV file at `path`. Nothing is touched until `load`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for CsvRecordStore {
    fn load(&self) -> Result<RecordSet, StoreError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;

        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                // spreadsheet exports prepend a BOM
                let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
                h.trim().to_string()
            })
            .collect();

        let mut records = Vec::new();
        for (index, row) in reader.records().enumerate() {
            let row = row?;
            let fields = columns.iter().map(String::as_str).zip(row.iter());
            let record = ModRecord::from_fields(fields).map_err(|source| StoreError::Record {
                row: index + 1,
                source,
            })?;
            records.push(record);
        }

        debug!("Loaded {} records from {}", records.len(), self.path.display());
        Ok(RecordSet { columns, records })
    }

    fn save(&self, set: &RecordSet) -> Result<(), StoreError> {
        let columns = set.output_columns();
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&columns)?;
        for record in &set.records {
            writer.write_record(
                columns
                    .iter()
                    .map(|c| record.field(c).unwrap_or_default()),
            )?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| StoreError::Csv(e.into_error().into()))?;

        filesystem::write_file(&self.path, &bytes)?;
        debug!("Saved {} records to {}", set.records.len(), self.path.display());
        Ok(())
    }
}
