//! Per-page state machine values and the run-level state they live in.
//!
//! ```text
//! Pending → Rendering → Rendered → Detecting ─┬─ Detected(false)            (done)
//!                                             └─ Detected(true) → Extracting → Extracted (done)
//!      any stage ──────────────────────────────────────────────→ Failed(stage)   (done)
//! ```
//!
//! [`RunState`] is only ever mutated by the orchestrator. Workers describe
//! what happened to a page as a [`Transition`]; the orchestrator applies it
//! and turns it into a [`ProgressEvent`].

use crate::output::{DetectionResult, ExtractionRecord};
use crate::progress::ProgressEvent;
use crate::store::ResultStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Render,
    Detect,
    Extract,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Render => write!(f, "render"),
            Stage::Detect => write!(f, "detect"),
            Stage::Extract => write!(f, "extract"),
        }
    }
}

/// Why a page ended as `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFailure {
    pub stage: Stage,
    pub error: String,
    /// Calls made before giving up.
    pub attempts: u32,
}

/// The state-machine value of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PageOutcome {
    Pending,
    Rendering,
    Rendered,
    Detecting,
    Detected(DetectionResult),
    Extracting,
    Extracted(ExtractionRecord),
    Failed(PageFailure),
}

impl PageOutcome {
    /// `Detected(false)`, `Extracted` and `Failed` end a page.
    pub fn is_terminal(&self) -> bool {
        match self {
            PageOutcome::Detected(d) => !d.has_symbol,
            PageOutcome::Extracted(_) | PageOutcome::Failed(_) => true,
            _ => false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.is_terminal() && !self.is_failed()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PageOutcome::Failed(_))
    }

    /// Was the symbol found on this page?
    ///
    /// A page that failed during extraction only got there through a
    /// positive detection, so it counts as found.
    pub fn is_positive(&self) -> bool {
        match self {
            PageOutcome::Detected(d) => d.has_symbol,
            PageOutcome::Extracting | PageOutcome::Extracted(_) => true,
            PageOutcome::Failed(f) => f.stage == Stage::Extract,
            _ => false,
        }
    }

    /// Lightweight label of this value, as carried by progress events.
    pub fn state(&self) -> PageState {
        match self {
            PageOutcome::Pending => PageState::Pending,
            PageOutcome::Rendering => PageState::Rendering,
            PageOutcome::Rendered => PageState::Rendered,
            PageOutcome::Detecting => PageState::Detecting,
            PageOutcome::Detected(d) => PageState::Detected {
                has_symbol: d.has_symbol,
            },
            PageOutcome::Extracting => PageState::Extracting,
            PageOutcome::Extracted(_) => PageState::Extracted,
            PageOutcome::Failed(f) => PageState::Failed { stage: f.stage },
        }
    }
}

/// Payload-free view of a [`PageOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PageState {
    Pending,
    Rendering,
    Rendered,
    Detecting,
    Detected { has_symbol: bool },
    Extracting,
    Extracted,
    Failed { stage: Stage },
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageState::Pending => write!(f, "pending"),
            PageState::Rendering => write!(f, "rendering"),
            PageState::Rendered => write!(f, "rendered"),
            PageState::Detecting => write!(f, "detecting"),
            PageState::Detected { has_symbol: true } => write!(f, "symbol found"),
            PageState::Detected { has_symbol: false } => write!(f, "no symbol"),
            PageState::Extracting => write!(f, "extracting"),
            PageState::Extracted => write!(f, "extracted"),
            PageState::Failed { stage } => write!(f, "failed ({stage})"),
        }
    }
}

/// A page moved to a new state. Sent by workers, applied by the orchestrator.
#[derive(Debug, Clone)]
pub(crate) struct Transition {
    pub page_index: usize,
    pub outcome: PageOutcome,
}

/// Where the run stands as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
}

/// Running counters, snapshotted into every progress event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Pages selected for this run.
    pub total: usize,
    /// Pages in a terminal state (done or failed).
    pub processed: usize,
    /// Pages with a positive detection.
    pub found: usize,
    pub failed: usize,
    /// Pages not yet dispatched.
    pub pending: usize,
}

/// One failed page, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub page_index: usize,
    pub stage: Stage,
    pub message: String,
    pub attempts: u32,
}

/// End-of-run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub document_id: String,
    pub status: RunStatus,
    pub total: usize,
    pub processed: usize,
    pub found: usize,
    pub failed: usize,
    pub pending: usize,
    pub failures: Vec<FailureEntry>,
}

/// State of one run over one document.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    document_id: String,
    document_page_count: usize,
    outcomes: BTreeMap<usize, PageOutcome>,
    processed_count: usize,
    found_count: usize,
    status: RunStatus,
    store: ResultStore,
}

impl RunState {
    /// A fresh run where every selected page is `Pending`.
    pub(crate) fn new(
        document_id: impl Into<String>,
        document_page_count: usize,
        selected: &[usize],
    ) -> Self {
        Self {
            document_id: document_id.into(),
            document_page_count,
            outcomes: selected.iter().map(|&i| (i, PageOutcome::Pending)).collect(),
            processed_count: 0,
            found_count: 0,
            status: RunStatus::Running,
            store: ResultStore::default(),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Pages in the whole document, selected or not.
    pub fn document_page_count(&self) -> usize {
        self.document_page_count
    }

    /// Pages selected for this run.
    pub fn total_pages(&self) -> usize {
        self.outcomes.len()
    }

    pub fn processed_count(&self) -> usize {
        self.processed_count
    }

    pub fn found_count(&self) -> usize {
        self.found_count
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Completed or cancelled; no orchestrator is working on it.
    pub fn is_finalized(&self) -> bool {
        self.status != RunStatus::Running
    }

    pub fn outcome(&self, page_index: usize) -> Option<&PageOutcome> {
        self.outcomes.get(&page_index)
    }

    /// Outcomes in page order.
    pub fn outcomes(&self) -> impl Iterator<Item = (usize, &PageOutcome)> {
        self.outcomes.iter().map(|(&i, o)| (i, o))
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn counts(&self) -> RunCounts {
        RunCounts {
            total: self.outcomes.len(),
            processed: self.processed_count,
            found: self.found_count,
            failed: self.indices_where(PageOutcome::is_failed).len(),
            pending: self
                .indices_where(|o| matches!(o, PageOutcome::Pending))
                .len(),
        }
    }

    pub fn summary(&self) -> RunSummary {
        let counts = self.counts();
        RunSummary {
            document_id: self.document_id.clone(),
            status: self.status,
            total: counts.total,
            processed: counts.processed,
            found: counts.found,
            failed: counts.failed,
            pending: counts.pending,
            failures: self.store.failures().collect(),
        }
    }

    pub fn pending_indices(&self) -> Vec<usize> {
        self.indices_where(|o| matches!(o, PageOutcome::Pending))
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.indices_where(PageOutcome::is_failed)
    }

    fn indices_where(&self, pred: impl Fn(&PageOutcome) -> bool) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(&i, _)| i)
            .collect()
    }

    /// Apply one transition and describe it as a progress event.
    ///
    /// Returns `None` for pages outside this run.
    pub(crate) fn apply(&mut self, transition: Transition) -> Option<ProgressEvent> {
        let Transition {
            page_index,
            outcome,
        } = transition;
        let Some(slot) = self.outcomes.get_mut(&page_index) else {
            warn!("Ignoring transition for unselected page {}", page_index + 1);
            return None;
        };

        match &outcome {
            PageOutcome::Extracted(record) => self.store.insert_record(page_index, record.clone()),
            PageOutcome::Failed(failure) => self.store.insert_failure(page_index, failure.clone()),
            _ => {}
        }
        let state = outcome.state();
        *slot = outcome;
        self.recount();

        Some(ProgressEvent {
            page_index,
            state,
            counts: self.counts(),
        })
    }

    /// Put every failed page back to `Pending`, one event per page.
    pub(crate) fn reset_failed(&mut self) -> Vec<ProgressEvent> {
        let failed = self.failed_indices();
        let mut events = Vec::with_capacity(failed.len());
        for page_index in failed {
            self.outcomes.insert(page_index, PageOutcome::Pending);
            self.store.remove_failure(page_index);
            self.recount();
            events.push(ProgressEvent {
                page_index,
                state: PageState::Pending,
                counts: self.counts(),
            });
        }
        events
    }

    pub(crate) fn set_status(&mut self, status: RunStatus) {
        self.status = status;
    }

    fn recount(&mut self) {
        self.processed_count = self.outcomes.values().filter(|o| o.is_terminal()).count();
        self.found_count = self.outcomes.values().filter(|o| o.is_positive()).count();
    }
}
