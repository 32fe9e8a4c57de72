//! The page state machine, driven over a bounded worker pool.
//!
//! ## Single writer
//!
//! Pages are rendered in order by a lazy [`page_sequence`]; each rendered
//! page is handed to a worker in a bounded pool that detects and extracts.
//! Workers never touch [`RunState`]. Rendering and every worker step are
//! reported as a [`Transition`] over an unbounded channel. The orchestrator loop is the only code that mutates
//! the state: it applies each transition, then hands the resulting
//! [`ProgressEvent`] to the progress callback.
//!
//! ## Cancellation
//!
//! The [`CancellationToken`] is checked each time the sequence draws the next
//! page index. Pages already dispatched finish (including their retries); pages
//! never dispatched stay `Pending`, so the state remains exportable and a
//! later [`Orchestrator::resume`] picks them up.
//!
//! The loop drains transitions before it polls the pool, so a cancel issued
//! from a progress callback takes effect before the next page is dispatched.

use crate::config::RunConfig;
use crate::error::{MagnifierError, RenderError};
use crate::pipeline::backend::resolve_backend;
use crate::pipeline::detect::Detector;
use crate::pipeline::extract::Extractor;
use crate::pipeline::input::Document;
use crate::pipeline::render::{
    page_sequence, CachingRenderer, PageImage, PageRenderer, PdfiumRenderer,
};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::state::{PageFailure, PageOutcome, RunState, RunStatus, Stage, Transition};
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives pages of one document through render → detect → extract.
pub struct Orchestrator {
    renderer: Arc<dyn PageRenderer>,
    detector: Detector,
    extractor: Extractor,
    callback: Arc<dyn ProgressCallback>,
    config: RunConfig,
}

impl Orchestrator {
    /// Assemble an orchestrator from explicit stages.
    ///
    /// Fails with [`MagnifierError::InvalidConfig`] when `config` does not
    /// validate; nothing is rendered or called in that case.
    pub fn new(
        config: &RunConfig,
        renderer: Arc<dyn PageRenderer>,
        detector: Detector,
        extractor: Extractor,
    ) -> Result<Self, MagnifierError> {
        config.validate()?;
        let callback = config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));
        Ok(Self {
            renderer,
            detector,
            extractor,
            callback,
            config: config.clone(),
        })
    }

    /// The production wiring: pdfium behind a page cache, backends resolved
    /// from the config.
    pub fn from_config(config: &RunConfig) -> Result<Self, MagnifierError> {
        config.validate()?;

        let detector_backend = resolve_backend(
            config.detector_backend.as_ref(),
            config.detector_provider.as_deref(),
            &config.detector_model,
        )?;
        let extractor_backend = resolve_backend(
            config.extractor_backend.as_ref(),
            config.extractor_provider.as_deref(),
            &config.extractor_model,
        )?;
        info!(
            "Detector: {}, extractor: {}",
            detector_backend.model_id(),
            extractor_backend.model_id()
        );

        let renderer = CachingRenderer::new(
            PdfiumRenderer::new(config.max_rendered_pixels, config.password.clone()),
            config.image_cache_dir.clone(),
        );

        Self::new(
            config,
            Arc::new(renderer),
            Detector::from_config(detector_backend, config),
            Extractor::from_config(extractor_backend, config),
        )
    }

    /// Create the run state for `document`: every selected page `Pending`.
    pub async fn start(&self, document: &Document) -> Result<RunState, MagnifierError> {
        let page_count = self.renderer.page_count(document).await?;
        let selected = self.config.pages.to_indices(page_count);
        if selected.is_empty() {
            return Err(MagnifierError::EmptySelection { total: page_count });
        }
        info!(
            "Document '{}': {} pages, {} selected",
            document.id,
            page_count,
            selected.len()
        );
        Ok(RunState::new(document.id.as_str(), page_count, &selected))
    }

    /// Start a run and process every selected page.
    pub async fn run(
        &self,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<RunState, MagnifierError> {
        let mut state = self.start(document).await?;
        self.resume(document, &mut state, cancel).await?;
        Ok(state)
    }

    /// Process every page that is still `Pending`.
    pub async fn resume(
        &self,
        document: &Document,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(), MagnifierError> {
        self.check_document(document, state)?;
        let pending = state.pending_indices();
        self.process(document, state, pending, cancel).await;
        Ok(())
    }

    /// Put only the `Failed` pages back to `Pending` and process exactly those.
    pub async fn retry_failed(
        &self,
        document: &Document,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(), MagnifierError> {
        self.check_document(document, state)?;
        let failed: Vec<usize> = state
            .reset_failed()
            .into_iter()
            .map(|event| {
                self.callback.on_event(&event);
                event.page_index
            })
            .collect();
        info!("Retrying {} failed page(s)", failed.len());
        self.process(document, state, failed, cancel).await;
        Ok(())
    }

    fn check_document(&self, document: &Document, state: &RunState) -> Result<(), MagnifierError> {
        if document.id != state.document_id() {
            return Err(MagnifierError::InvalidInput {
                input: format!(
                    "run state belongs to '{}', not '{}'",
                    state.document_id(),
                    document.id
                ),
            });
        }
        Ok(())
    }

    async fn process(
        &self,
        document: &Document,
        state: &mut RunState,
        indices: Vec<usize>,
        cancel: &CancellationToken,
    ) {
        state.set_status(RunStatus::Running);
        self.callback
            .on_run_start(state.document_id(), state.total_pages());
        debug!("Dispatching {} page(s), concurrency {}", indices.len(), self.config.concurrency);

        let (tx, mut rx) = mpsc::unbounded_channel::<Transition>();
        let worker_tx = tx.clone();
        let render_tx = tx.clone();
        let not_cancelled = cancel.clone();
        let dispatch = indices
            .into_iter()
            .take_while(move |_| !not_cancelled.is_cancelled())
            .inspect(move |&page_index| {
                let _ = render_tx.send(Transition {
                    page_index,
                    outcome: PageOutcome::Rendering,
                });
            });
        let mut pages = Box::pin(
            page_sequence(&*self.renderer, document, dispatch, self.config.dpi)
                .map(|(page_index, rendered)| {
                    let tx = worker_tx.clone();
                    async move { self.process_page(page_index, rendered, &tx).await }
                })
                .buffer_unordered(self.config.concurrency),
        );

        loop {
            tokio::select! {
                biased;
                Some(transition) = rx.recv() => self.apply(state, transition),
                next = pages.next() => {
                    if next.is_none() {
                        break;
                    }
                }
            }
        }

        drop(pages);
        drop(tx);
        while let Ok(transition) = rx.try_recv() {
            self.apply(state, transition);
        }

        let status = if cancel.is_cancelled() && !state.pending_indices().is_empty() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        state.set_status(status);

        let summary = state.summary();
        info!(
            "Run {:?}: {} processed, {} found, {} failed, {} pending",
            status, summary.processed, summary.found, summary.failed, summary.pending
        );
        self.callback.on_run_complete(&summary);
    }

    fn apply(&self, state: &mut RunState, transition: Transition) {
        if let Some(event) = state.apply(transition) {
            self.callback.on_event(&event);
        }
    }

    /// One rendered page through the rest of the state machine. Every step
    /// is reported on `tx`.
    async fn process_page(
        &self,
        page_index: usize,
        rendered: Result<PageImage, RenderError>,
        tx: &UnboundedSender<Transition>,
    ) {
        let page_no = page_index + 1;
        let send = |outcome: PageOutcome| {
            let _ = tx.send(Transition {
                page_index,
                outcome,
            });
        };
        let fail = |stage: Stage, error: String, attempts: u32| {
            warn!("Page {}: {} failed after {} attempt(s): {}", page_no, stage, attempts, error);
            send(PageOutcome::Failed(PageFailure {
                stage,
                error,
                attempts,
            }));
        };

        let page = match rendered {
            Ok(page) => page,
            Err(e) => return fail(Stage::Render, e.to_string(), 1),
        };
        send(PageOutcome::Rendered);

        send(PageOutcome::Detecting);
        let detection = match self.detector.submit(&page).await {
            Ok(d) => d.value,
            Err(e) => return fail(Stage::Detect, e.value.to_string(), e.attempts),
        };
        let positive = detection.has_symbol;
        send(PageOutcome::Detected(detection));
        if !positive {
            return;
        }

        send(PageOutcome::Extracting);
        match self.extractor.submit(&page).await {
            Ok(r) => send(PageOutcome::Extracted(r.value)),
            Err(e) => fail(Stage::Extract, e.value.to_string(), e.attempts),
        }
    }
}
