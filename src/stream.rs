//! Background scans with progress as an async `Stream`.
//!
//! ## Why stream?
//!
//! A large batch takes minutes. [`scan_with_events`] starts the run on a
//! Tokio task and hands back a [`ScanHandle`]: its `events` stream yields a
//! [`ProgressEvent`] after every page transition and ends when the run ends,
//! so a UI can render progress while the library stays presentation-free.
//!
//! Fatal errors (bad config, unreadable input, missing provider, locked PDF)
//! are returned before the task is spawned.

use crate::config::RunConfig;
use crate::error::MagnifierError;
use crate::orchestrator::Orchestrator;
use crate::pipeline::input;
use crate::progress::{ChannelProgress, ProgressCallback, ProgressEvent};
use crate::state::{RunState, RunSummary};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Progress events of one run, in the order they were applied.
pub type EventStream = UnboundedReceiverStream<ProgressEvent>;

/// A run in flight.
pub struct ScanHandle {
    /// Ends when the run completes or is cancelled.
    pub events: EventStream,
    task: JoinHandle<Result<RunState, MagnifierError>>,
    cancel: CancellationToken,
}

impl ScanHandle {
    /// Stop dispatching new pages; in-flight pages still finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run and return its finalized state.
    pub async fn finish(self) -> Result<RunState, MagnifierError> {
        self.task
            .await
            .map_err(|e| MagnifierError::Internal(format!("Scan task failed: {}", e)))?
    }
}

/// Sends every callback to each of its targets.
struct Fanout(Vec<Arc<dyn ProgressCallback>>);

impl ProgressCallback for Fanout {
    fn on_run_start(&self, document_id: &str, total_pages: usize) {
        self.0
            .iter()
            .for_each(|cb| cb.on_run_start(document_id, total_pages));
    }

    fn on_event(&self, event: &ProgressEvent) {
        self.0.iter().for_each(|cb| cb.on_event(event));
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        self.0.iter().for_each(|cb| cb.on_run_complete(summary));
    }
}

/// Start scanning in the background and stream its progress.
///
/// A callback already set on `config` keeps receiving events too.
///
/// # Example
/// ```rust,no_run
/// use edgequake_magnifier::{scan_with_events, RunConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut handle = scan_with_events("batch.pdf", &RunConfig::default()).await?;
/// while let Some(event) = handle.events.next().await {
///     eprintln!("page {}: {}", event.page_index + 1, event.state);
/// }
/// let state = handle.finish().await?;
/// println!("{} annotations", state.store().record_count());
/// # Ok(())
/// # }
/// ```
pub async fn scan_with_events(
    input_str: impl AsRef<str>,
    config: &RunConfig,
) -> Result<ScanHandle, MagnifierError> {
    let input_str = input_str.as_ref();
    config.validate()?;
    info!("Starting background scan: {}", input_str);

    let document = input::resolve_input(
        input_str,
        config.max_document_bytes,
        config.download_timeout_secs,
    )
    .await?;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let channel: Arc<dyn ProgressCallback> = Arc::new(ChannelProgress::new(tx));
    let mut config = config.clone();
    config.progress_callback = Some(match config.progress_callback.take() {
        Some(existing) => Arc::new(Fanout(vec![existing, channel])) as Arc<dyn ProgressCallback>,
        None => channel,
    });

    let orchestrator = Orchestrator::from_config(&config)?;
    let mut state = orchestrator.start(&document).await?;

    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        orchestrator
            .resume(&document, &mut state, &task_cancel)
            .await?;
        Ok::<_, MagnifierError>(state)
    });

    Ok(ScanHandle {
        events: UnboundedReceiverStream::new(rx),
        task,
        cancel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PageState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Count(AtomicUsize);

    impl ProgressCallback for Count {
        fn on_event(&self, _event: &ProgressEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn fanout_reaches_every_target() {
        let a = Arc::new(Count(AtomicUsize::new(0)));
        let b = Arc::new(Count(AtomicUsize::new(0)));
        let targets: Vec<Arc<dyn ProgressCallback>> = vec![a.clone(), b.clone()];
        let fan = Fanout(targets);
        fan.on_event(&ProgressEvent {
            page_index: 0,
            state: PageState::Rendering,
            counts: Default::default(),
        });
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_config_is_returned_before_spawning() {
        let mut config = RunConfig::default();
        config.dpi = 10;
        let err = scan_with_events("whatever.pdf", &config).await.err().unwrap();
        assert!(matches!(err, MagnifierError::InvalidConfig(_)));
    }
}
