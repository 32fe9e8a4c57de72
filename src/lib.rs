//! # edgequake-magnifier
//!
//! Find pages of a scanned PDF that carry a magnifier symbol in the margin,
//! read the annotation next to it, and export the results as a table.
//!
//! ## Why two models?
//!
//! Most pages in a batch carry no symbol. A cheap vision model answers the
//! yes/no question for every page; only positive pages are sent to a
//! stronger model that returns a strict JSON record. The two stages are
//! configured independently (provider, model), so either can be swapped
//! without touching the other.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Render   rasterise one page via pdfium (spawn_blocking, cached)
//!  ├─ 3. Detect   yes/no classifier call, retried on transient errors
//!  ├─ 4. Extract  strict-schema JSON call on positive pages only
//!  └─ 5. Store    one row per extracted page, sorted CSV / JSON export
//! ```
//!
//! Pages move through a small state machine (see [`state`]), driven by the
//! [`Orchestrator`] over a bounded worker pool. A failed page never aborts
//! the run; it is recorded with the stage and reason and can be retried
//! later with [`Orchestrator::retry_failed`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_magnifier::{scan, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Providers auto-detected from OPENAI_API_KEY / GEMINI_API_KEY / …
//!     let config = RunConfig::default();
//!     let state = scan("batch.pdf", &config).await?;
//!     let summary = state.summary();
//!     eprintln!("{} pages, {} with symbol, {} failed",
//!         summary.total, summary.found, summary.failed);
//!     state.store().save_csv(std::path::Path::new("annotations.csv")).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `magnifier` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-magnifier = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod scan;
pub mod state;
pub mod store;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    PageSelection, RunConfig, RunConfigBuilder, DEFAULT_DETECTOR_MODEL, DEFAULT_EXTRACTOR_MODEL,
    DEFAULT_MAX_DOCUMENT_BYTES,
};
pub use error::{ErrorClass, MagnifierError, ModelError, RenderError};
pub use orchestrator::Orchestrator;
pub use output::{DetectionResult, ExtractionRecord};
pub use pipeline::backend::{LlmBackend, VisionBackend, VisionRequest, VisionResponse};
pub use pipeline::detect::Detector;
pub use pipeline::extract::Extractor;
pub use pipeline::input::{resolve_input, Document, DocumentSource};
pub use pipeline::page_number::PageNumber;
pub use pipeline::render::{
    CachingRenderer, DocumentMetadata, PageImage, PageRenderer, PdfiumRenderer,
};
pub use pipeline::retry::RetryPolicy;
pub use progress::{ChannelProgress, NoopProgressCallback, ProgressCallback, ProgressEvent};
pub use scan::{
    export, inspect, scan, scan_document, scan_from_bytes, scan_sync, scan_to_file,
    scan_with_cancel, ExportFormat,
};
pub use state::{
    FailureEntry, PageFailure, PageOutcome, PageState, RunCounts, RunState, RunStatus,
    RunSummary, Stage,
};
pub use store::{ExportRow, ResultStore, EXPORT_COLUMNS};
pub use stream::{scan_with_events, EventStream, ScanHandle};
