//! Progress events and the callback trait that receives them.
//!
//! Inject an [`Arc<dyn ProgressCallback>`] via
//! [`crate::config::RunConfigBuilder::progress_callback`] to receive an
//! immutable [`ProgressEvent`] after every page transition.
//!
//! # Why callbacks instead of channels?
//!
//! The callback is the least-invasive integration point: callers can forward
//! events to a channel (see [`ChannelProgress`]), a WebSocket or a terminal
//! progress bar without the library knowing how the host presents them.
//! Events are delivered from the orchestrator task only, in the order the
//! transitions were applied, so implementations never see two events at once.
//!
//! # Example
//!
//! ```rust
//! use edgequake_magnifier::{ProgressCallback, ProgressEvent, RunConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Found(AtomicUsize);
//!
//! impl ProgressCallback for Found {
//!     fn on_event(&self, event: &ProgressEvent) {
//!         self.0.store(event.counts.found, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = RunConfig::builder()
//!     .progress_callback(Arc::new(Found(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::state::{PageState, RunCounts, RunSummary};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// One page changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 0-indexed page that moved.
    pub page_index: usize,
    /// The state it moved to.
    pub state: PageState,
    /// Run counters after the move.
    pub counts: RunCounts,
}

impl ProgressEvent {
    /// Did this event end the page?
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            PageState::Detected { has_symbol: false }
                | PageState::Extracted
                | PageState::Failed { .. }
        )
    }
}

/// Called by the orchestrator as the run progresses.
///
/// All methods default to no-ops so callers only override what they need.
pub trait ProgressCallback: Send + Sync {
    /// Called once before any page is dispatched.
    fn on_run_start(&self, document_id: &str, total_pages: usize) {
        let _ = (document_id, total_pages);
    }

    /// Called after every page transition.
    fn on_event(&self, event: &ProgressEvent) {
        let _ = event;
    }

    /// Called once when the run completes or is cancelled.
    fn on_run_complete(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl ProgressCallback for NoopProgressCallback {}

/// Forwards every event into an unbounded Tokio channel.
///
/// Send errors (receiver dropped) are ignored: a consumer that stops
/// listening must not stop the run.
pub struct ChannelProgress {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressCallback for ChannelProgress {
    fn on_event(&self, event: &ProgressEvent) {
        let _ = self.tx.send(*event);
    }
}
