//! Result aggregation and tabular export.
//!
//! Records and failures are keyed by page index, never by arrival order, so
//! pages finishing out of order under concurrency still export sorted by
//! `source_page_index`. Export is a pure function of the stored values:
//! the same store always produces the same bytes.

use crate::error::MagnifierError;
use crate::output::ExtractionRecord;
use crate::state::{FailureEntry, PageFailure};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// Column order of the exported table.
pub const EXPORT_COLUMNS: [&str; 6] = [
    "page_id",
    "cycle_id",
    "page_number",
    "extracted_text",
    "source_page_index",
    "model_used",
];

/// One row of the exported table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub page_id: u32,
    pub cycle_id: u64,
    /// Printed label (`"12"`, `"xiv"`); empty when unknown.
    pub page_number: String,
    pub extracted_text: String,
    pub source_page_index: usize,
    pub model_used: String,
}

impl From<&ExtractionRecord> for ExportRow {
    fn from(r: &ExtractionRecord) -> Self {
        Self {
            page_id: r.page_id,
            cycle_id: r.cycle_id,
            page_number: r
                .page_number
                .as_ref()
                .map(|p| p.label())
                .unwrap_or_default(),
            extracted_text: r.extracted_text.clone(),
            source_page_index: r.source_page_index,
            model_used: r.model_used.clone(),
        }
    }
}

/// Extraction records and failure entries of one run, keyed by page index.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultStore {
    records: BTreeMap<usize, ExtractionRecord>,
    failures: BTreeMap<usize, PageFailure>,
}

impl ResultStore {
    pub(crate) fn insert_record(&mut self, page_index: usize, record: ExtractionRecord) {
        self.failures.remove(&page_index);
        self.records.insert(page_index, record);
    }

    pub(crate) fn insert_failure(&mut self, page_index: usize, failure: PageFailure) {
        self.records.remove(&page_index);
        self.failures.insert(page_index, failure);
    }

    pub(crate) fn remove_failure(&mut self, page_index: usize) {
        self.failures.remove(&page_index);
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Records in page order.
    pub fn records(&self) -> impl Iterator<Item = &ExtractionRecord> {
        self.records.values()
    }

    /// Failures in page order.
    pub fn failures(&self) -> impl Iterator<Item = FailureEntry> + '_ {
        self.failures.iter().map(|(&page_index, f)| FailureEntry {
            page_index,
            stage: f.stage,
            message: f.error.clone(),
            attempts: f.attempts,
        })
    }

    /// Export rows sorted by `source_page_index`.
    pub fn rows(&self) -> Vec<ExportRow> {
        let mut rows: Vec<ExportRow> = self.records.values().map(ExportRow::from).collect();
        rows.sort_by_key(|r| r.source_page_index);
        rows
    }

    /// Write the table as CSV, header first, to any writer.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), MagnifierError> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        wtr.write_record(EXPORT_COLUMNS)?;
        for row in self.rows() {
            wtr.serialize(&row)?;
        }
        wtr.flush().map_err(|e| MagnifierError::Export(e.into()))?;
        Ok(())
    }

    /// The CSV export as bytes.
    pub fn to_csv(&self) -> Result<Vec<u8>, MagnifierError> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(buf)
    }

    /// The same rows as a pretty-printed JSON array.
    pub fn to_json(&self) -> Result<String, MagnifierError> {
        serde_json::to_string_pretty(&self.rows())
            .map_err(|e| MagnifierError::Internal(format!("JSON export: {e}")))
    }

    /// Write the CSV export to `path` atomically (temp file + rename).
    pub async fn save_csv(&self, path: &Path) -> Result<(), MagnifierError> {
        let bytes = self.to_csv()?;
        write_atomic(path, &bytes, "csv.tmp").await
    }

    /// Write the JSON export to `path` atomically.
    pub async fn save_json(&self, path: &Path) -> Result<(), MagnifierError> {
        let json = self.to_json()?;
        write_atomic(path, json.as_bytes(), "json.tmp").await
    }
}

/// Atomic write: write to a sibling temp file, then rename over the target.
async fn write_atomic(path: &Path, bytes: &[u8], tmp_ext: &str) -> Result<(), MagnifierError> {
    let write_err = |source| MagnifierError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension(tmp_ext);
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}
