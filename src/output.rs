//! Values produced by the detector and extractor stages.

use crate::pipeline::page_number::PageNumber;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one successful detection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// 0-indexed page this result belongs to.
    pub page_index: usize,
    /// Whether the magnifier symbol is present in the page margins.
    pub has_symbol: bool,
    /// The model's answer, verbatim.
    pub raw_model_output: String,
    /// Classifier confidence, when the backend reports one.
    pub confidence: Option<f32>,
    /// Model that produced the answer.
    pub model: String,
    /// 1-based attempt number that succeeded.
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

/// The annotation extracted from one positive page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    /// 1-based position of the page in the document.
    pub page_id: u32,
    /// Batch grouping identifier printed next to the symbol.
    pub cycle_id: u64,
    /// Printed page number; `None` when absent or not legible.
    pub page_number: Option<PageNumber>,
    /// Text following the symbol.
    pub extracted_text: String,
    /// 0-indexed page the record came from.
    pub source_page_index: usize,
    pub model_used: String,
    pub timestamp: DateTime<Utc>,
}
