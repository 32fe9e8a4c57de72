//! Top-level entry points: wait for the whole run, then return its state.
//!
//! Use [`crate::stream::scan_with_events`] instead when you want progress
//! events as an async stream while the run is in flight.

use crate::config::RunConfig;
use crate::error::MagnifierError;
use crate::orchestrator::Orchestrator;
use crate::pipeline::input::{self, Document};
use crate::pipeline::render::{DocumentMetadata, PdfiumRenderer};
use crate::state::{RunState, RunSummary};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Tabular export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    /// `.json` → JSON, anything else → CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ExportFormat::Json,
            _ => ExportFormat::Csv,
        }
    }
}

/// Scan a PDF file or URL for magnifier annotations.
///
/// # Returns
/// The finalized [`RunState`], even if some pages failed (see
/// [`RunState::summary`]); its [`crate::ResultStore`] holds the table.
///
/// # Errors
/// Only fatal errors: invalid configuration, unreadable input, not a PDF,
/// provider not configured.
///
/// # Example
/// ```rust,no_run
/// use edgequake_magnifier::{scan, RunConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let state = scan("batch.pdf", &RunConfig::default()).await?;
/// std::io::Write::write_all(&mut std::io::stdout(), &state.store().to_csv()?)?;
/// # Ok(())
/// # }
/// ```
pub async fn scan(
    input_str: impl AsRef<str>,
    config: &RunConfig,
) -> Result<RunState, MagnifierError> {
    scan_with_cancel(input_str, config, &CancellationToken::new()).await
}

/// [`scan`] that stops dispatching pages once `cancel` fires.
pub async fn scan_with_cancel(
    input_str: impl AsRef<str>,
    config: &RunConfig,
    cancel: &CancellationToken,
) -> Result<RunState, MagnifierError> {
    let input_str = input_str.as_ref();
    config.validate()?;
    info!("Starting scan: {}", input_str);

    let document = input::resolve_input(
        input_str,
        config.max_document_bytes,
        config.download_timeout_secs,
    )
    .await?;
    scan_document(&document, config, cancel).await
}

/// Scan an already-resolved [`Document`].
pub async fn scan_document(
    document: &Document,
    config: &RunConfig,
    cancel: &CancellationToken,
) -> Result<RunState, MagnifierError> {
    let orchestrator = Orchestrator::from_config(config)?;
    orchestrator.run(document, cancel).await
}

/// Scan PDF bytes held in memory; `id` names the document in logs and caches.
pub async fn scan_from_bytes(
    id: &str,
    bytes: &[u8],
    config: &RunConfig,
) -> Result<RunState, MagnifierError> {
    config.validate()?;
    let document = Document::from_bytes(id, bytes.to_vec());
    input::validate_bytes(&document, config.max_document_bytes)?;
    scan_document(&document, config, &CancellationToken::new()).await
}

/// Scan and write the table to `output_path` (CSV, or JSON for `.json`).
///
/// The write is atomic (temp file + rename), so a partial file never
/// replaces a previous export.
pub async fn scan_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &RunConfig,
) -> Result<RunSummary, MagnifierError> {
    let state = scan(input_str, config).await?;
    export(&state, output_path.as_ref()).await?;
    Ok(state.summary())
}

/// Write a run's table to `path` in the format implied by its extension.
pub async fn export(state: &RunState, path: &Path) -> Result<(), MagnifierError> {
    match ExportFormat::from_path(path) {
        ExportFormat::Csv => state.store().save_csv(path).await,
        ExportFormat::Json => state.store().save_json(path).await,
    }
}

/// Synchronous wrapper around [`scan`].
///
/// Creates a temporary tokio runtime internally.
pub fn scan_sync(
    input_str: impl AsRef<str>,
    config: &RunConfig,
) -> Result<RunState, MagnifierError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| MagnifierError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(scan(input_str, config))
}

/// Read PDF metadata without scanning.
///
/// Does not require an LLM provider or API key.
pub async fn inspect(
    input_str: impl AsRef<str>,
    password: Option<&str>,
) -> Result<DocumentMetadata, MagnifierError> {
    let document = input::resolve_input(
        input_str.as_ref(),
        crate::config::DEFAULT_MAX_DOCUMENT_BYTES,
        120,
    )
    .await?;
    PdfiumRenderer::new(2000, password.map(str::to_string))
        .metadata(&document)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_format_from_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("out.csv")), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path(Path::new("out.JSON")), ExportFormat::Json);
        assert_eq!(ExportFormat::from_path(Path::new("out")), ExportFormat::Csv);
    }

    #[tokio::test]
    async fn invalid_config_fails_before_input_is_read() {
        let mut config = RunConfig::default();
        config.max_retries = 50;
        let err = scan("/does/not/exist.pdf", &config).await.unwrap_err();
        assert!(matches!(err, MagnifierError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn bytes_must_be_pdf() {
        let err = scan_from_bytes("x", b"hello", &RunConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MagnifierError::NotAPdf { .. }));
    }
}
