//! Error types for the edgequake-magnifier library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`MagnifierError`]: fatal. The run cannot start or its result
//!   cannot be written (missing file, not a PDF, invalid configuration,
//!   provider not configured). Returned as `Err(MagnifierError)` from the
//!   top-level `scan*` functions and from the orchestrator.
//!
//! * [`RenderError`]: per page. One page could not be rasterised. The
//!   page ends as `Failed(render)`; every other page carries on.
//!
//! * [`ModelError`]: per attempt. One detector/extractor call failed.
//!   [`ModelError::is_transient`] decides whether the retry loop tries again
//!   or gives up immediately.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-magnifier library.
///
/// Page-level failures are recorded as
/// [`crate::state::PageOutcome::Failed`] instead of being propagated here.
#[derive(Debug, Error)]
pub enum MagnifierError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The document was read, but is not a PDF.
    #[error("Document '{id}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { id: String, magic: [u8; 4] },

    /// The document exceeds the configured size limit.
    #[error("Document '{id}' is {size} bytes; the limit is {limit} bytes")]
    DocumentTooLarge { id: String, size: u64, limit: u64 },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{id}' is corrupt: {detail}")]
    CorruptPdf { id: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{id}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { id: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{id}'")]
    WrongPassword { id: String },

    /// The page selection matched no page of the document.
    #[error("Page selection matches no page (document has {total} pages)")]
    EmptySelection { total: usize },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Run configuration failed validation. No page was processed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the export file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The CSV writer rejected a row.
    #[error("Failed to export results: {0}")]
    Export(#[from] csv::Error),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium or set PDFIUM_LIB_PATH to the directory that contains it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A page could not be rasterised.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderError {
    /// The requested page index does not exist in the document.
    #[error("page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium could not open the document or draw the page.
    #[error("rasterisation failed for page {page}: {detail}")]
    Rasterisation { page: usize, detail: String },

    /// The bitmap could not be encoded as PNG.
    #[error("image encoding failed for page {page}: {detail}")]
    Encoding { page: usize, detail: String },
}

/// Retryable or not: the only thing the retry loop needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// One failed model call, classified.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    // ── Transient ─────────────────────────────────────────────────────────
    /// No answer within the per-attempt timeout, or the provider's own.
    #[error("model call timed out: {detail}")]
    Timeout { detail: String },

    /// HTTP 429 or an equivalent provider message.
    #[error("rate limited: {detail}")]
    RateLimited { detail: String },

    /// 5xx, overloaded backend, dropped connection.
    #[error("server error: {detail}")]
    Server { detail: String },

    // ── Permanent ─────────────────────────────────────────────────────────
    /// The provider rejected the image itself.
    #[error("invalid image: {detail}")]
    InvalidImage { detail: String },

    /// The provider refused the request (content filter, safety policy).
    #[error("refused by provider policy: {detail}")]
    PolicyRefusal { detail: String },

    /// The response did not match the expected shape.
    #[error("schema violation: {detail}")]
    SchemaViolation { detail: String },

    /// Authentication, bad request or any error not known to be transient.
    #[error("provider error: {detail}")]
    Provider { detail: String },
}

impl ModelError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ModelError::Timeout { .. } | ModelError::RateLimited { .. } | ModelError::Server { .. } => {
                ErrorClass::Transient
            }
            _ => ErrorClass::Permanent,
        }
    }

    /// Should the retry loop try this call again?
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub(crate) fn schema(detail: impl Into<String>) -> Self {
        ModelError::SchemaViolation {
            detail: detail.into(),
        }
    }
}
