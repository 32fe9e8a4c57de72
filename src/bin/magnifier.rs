//! CLI binary for edgequake-magnifier.
//!
//! A thin shim over the library crate that maps CLI flags to `RunConfig`,
//! renders progress and writes the annotation table.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_magnifier::{
    export, inspect, resolve_input, DocumentMetadata, Orchestrator, PageSelection, PageState, ProgressCallback,
    ProgressEvent, RunConfig, RunState, RunStatus, RunSummary, DEFAULT_DETECTOR_MODEL,
    DEFAULT_EXTRACTOR_MODEL,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished page.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ProgressCallback for CliProgress {
    fn on_run_start(&self, document_id: &str, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  {msg}  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Scanning");
        self.bar.set_message("");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Scanning {total_pages} pages of '{document_id}'…"))
        ));
    }

    fn on_event(&self, event: &ProgressEvent) {
        let page = event.page_index + 1;
        self.bar.set_position(event.counts.processed as u64);
        self.bar
            .set_message(format!("{} found", event.counts.found));

        match event.state {
            PageState::Detected { has_symbol: false } => {
                self.bar
                    .println(format!("  {} Page {:>3}  {}", dim("·"), page, dim("no symbol")));
            }
            PageState::Extracted => {
                self.bar
                    .println(format!("  {} Page {:>3}  annotation extracted", green("✓"), page));
            }
            PageState::Failed { stage } => {
                self.bar.println(format!(
                    "  {} Page {:>3}  {}",
                    red("✗"),
                    page,
                    red(&format!("{stage} failed"))
                ));
            }
            _ => {}
        }
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        self.bar.finish_and_clear();
        let mark = match (summary.status, summary.failed) {
            (RunStatus::Cancelled, _) => cyan("■"),
            (_, 0) => green("✔"),
            _ => cyan("⚠"),
        };
        eprintln!(
            "{} {}/{} pages processed, {} with symbol, {} failed{}",
            mark,
            bold(&summary.processed.to_string()),
            summary.total,
            bold(&summary.found.to_string()),
            if summary.failed > 0 {
                red(&summary.failed.to_string())
            } else {
                summary.failed.to_string()
            },
            if summary.pending > 0 {
                format!(", {} not started", summary.pending)
            } else {
                String::new()
            },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Scan a batch, CSV to stdout
  magnifier batch.pdf

  # Write the table to a file (.csv or .json)
  magnifier batch.pdf -o annotations.csv

  # Only pages 10-40, re-run failed pages twice
  magnifier --pages 10-40 --retry-failed 2 batch.pdf -o out.csv

  # Different models per stage
  magnifier --detector-model gemini-2.0-flash \
            --extractor-provider openai --extractor-model gpt-4o-2024-08-06 batch.pdf

  # Inspect PDF metadata (no API key needed)
  magnifier --inspect-only batch.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  GEMINI_API_KEY          Google Gemini API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Provider for stages without --*-provider
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)

Ctrl-C stops dispatching new pages; pages in flight finish and the partial
table is still written.
"#;

/// Find magnifier-marked annotations in scanned PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "magnifier",
    version,
    about = "Find magnifier-marked annotations in scanned PDFs and export them as a table",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write the table to this file (.csv or .json) instead of stdout.
    #[arg(short, long, env = "MAGNIFIER_OUTPUT")]
    output: Option<PathBuf>,

    /// Print JSON instead of CSV on stdout.
    #[arg(long, env = "MAGNIFIER_JSON")]
    json: bool,

    /// Page selection: all, 5, 3-15, 1,3,5 or a mix such as 1,4-6,9.
    #[arg(long, env = "MAGNIFIER_PAGES", default_value = "all")]
    pages: PageSelection,

    /// Rendering DPI (72–400).
    #[arg(long, env = "MAGNIFIER_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Longest rendered edge in pixels.
    #[arg(long, env = "MAGNIFIER_MAX_PIXELS", default_value_t = 2400)]
    max_pixels: u32,

    /// Pages processed at the same time.
    #[arg(short, long, env = "MAGNIFIER_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per model call on transient errors.
    #[arg(long, env = "MAGNIFIER_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Base backoff between retries, doubled on each retry.
    #[arg(long, env = "MAGNIFIER_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "MAGNIFIER_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "MAGNIFIER_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Provider for the detection stage (openai, gemini, anthropic, ollama…).
    #[arg(long, env = "MAGNIFIER_DETECTOR_PROVIDER")]
    detector_provider: Option<String>,

    /// Model for the detection stage.
    #[arg(long, env = "MAGNIFIER_DETECTOR_MODEL", default_value = DEFAULT_DETECTOR_MODEL)]
    detector_model: String,

    /// Provider for the extraction stage.
    #[arg(long, env = "MAGNIFIER_EXTRACTOR_PROVIDER")]
    extractor_provider: Option<String>,

    /// Model for the extraction stage.
    #[arg(long, env = "MAGNIFIER_EXTRACTOR_MODEL", default_value = DEFAULT_EXTRACTOR_MODEL)]
    extractor_model: String,

    /// Extra passes over pages that failed.
    #[arg(long, env = "MAGNIFIER_RETRY_FAILED", default_value_t = 0)]
    retry_failed: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "MAGNIFIER_PASSWORD")]
    password: Option<String>,

    /// Keep rendered pages here and reuse them on later runs.
    #[arg(long, env = "MAGNIFIER_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "MAGNIFIER_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no scan.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MAGNIFIER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MAGNIFIER_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar provides the feedback that matters; keep INFO logs out of it.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let meta = inspect(&cli.input, cli.password.as_deref())
            .await
            .context("Failed to inspect PDF")?;

        let selected = cli.pages.to_indices(meta.page_count).len();
        if cli.json {
            let report = serde_json::json!({
                "input": cli.input,
                "metadata": meta,
                "selected_pages": selected,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialize metadata")?
            );
        } else {
            print!("{}", describe_document(&cli.input, &meta, selected));
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress: Option<Arc<dyn ProgressCallback>> = if show_progress {
        Some(CliProgress::new() as Arc<dyn ProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    // ── Ctrl-C → cooperative cancellation ────────────────────────────────
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Cancelling: waiting for pages in flight…", cyan("■"));
            on_signal.cancel();
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let document = resolve_input(
        &cli.input,
        config.max_document_bytes,
        config.download_timeout_secs,
    )
    .await
    .context("Failed to open input")?;
    let orchestrator = Orchestrator::from_config(&config).context("Failed to set up the scan")?;
    let mut state = orchestrator
        .run(&document, &cancel)
        .await
        .context("Scan failed")?;

    for pass in 1..=cli.retry_failed {
        if state.failed_indices().is_empty() || cancel.is_cancelled() {
            break;
        }
        if !cli.quiet {
            eprintln!(
                "{} Retry pass {}/{}: {} failed page(s)",
                cyan("↻"),
                pass,
                cli.retry_failed,
                state.failed_indices().len()
            );
        }
        orchestrator
            .retry_failed(&document, &mut state, &cancel)
            .await
            .context("Retry pass failed")?;
    }

    // ── Output ───────────────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        export(&state, output_path)
            .await
            .context("Failed to write output")?;
        if !cli.quiet {
            eprintln!(
                "{}  {} row(s)  →  {}",
                green("✔"),
                state.store().record_count(),
                bold(&output_path.display().to_string()),
            );
        }
    } else {
        write_stdout(&state, cli.json)?;
    }

    if !cli.quiet {
        print_failures(&state, show_progress);
    }

    Ok(())
}

fn write_stdout(state: &RunState, json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if json {
        let text = state.store().to_json().context("Failed to serialise output")?;
        writeln!(handle, "{text}").context("Failed to write to stdout")?;
    } else {
        let csv = state.store().to_csv().context("Failed to serialise output")?;
        handle.write_all(&csv).context("Failed to write to stdout")?;
    }
    Ok(())
}

/// The run summary always names failed pages, with stage and reason.
fn print_failures(state: &RunState, progress_shown: bool) {
    let summary = state.summary();
    if !progress_shown {
        eprintln!(
            "Processed {}/{} pages: {} with symbol, {} failed, {} pending",
            summary.processed, summary.total, summary.found, summary.failed, summary.pending
        );
    }
    for failure in &summary.failures {
        let msg = if failure.message.chars().count() > 100 {
            let cut: String = failure.message.chars().take(99).collect();
            format!("{cut}\u{2026}")
        } else {
            failure.message.clone()
        };
        eprintln!(
            "  {} Page {:>3}  {} after {} attempt(s): {}",
            red("✗"),
            failure.page_index + 1,
            failure.stage,
            failure.attempts,
            dim(&msg)
        );
    }
}

/// Plain-text `--inspect-only` report: what a scan of this input would cover.
fn describe_document(input: &str, meta: &DocumentMetadata, selected: usize) -> String {
    let mut out = format!(
        "{input}: {} page(s), PDF {}; a scan would cover {selected} page(s)\n",
        meta.page_count, meta.pdf_version
    );
    let details = [
        ("title", &meta.title),
        ("author", &meta.author),
        ("creator", &meta.creator),
        ("producer", &meta.producer),
    ];
    for (label, value) in details {
        if let Some(value) = value {
            out.push_str(&format!("  {label:<9}{value}\n"));
        }
    }
    out
}

/// Map CLI args to `RunConfig`.
fn build_config(cli: &Cli, progress: Option<Arc<dyn ProgressCallback>>) -> Result<RunConfig> {
    let mut builder = RunConfig::builder()
        .dpi(cli.dpi)
        .max_rendered_pixels(cli.max_pixels)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .detector_model(cli.detector_model.as_str())
        .extractor_model(cli.extractor_model.as_str())
        .pages(cli.pages.clone());

    if let Some(ref p) = cli.detector_provider {
        builder = builder.detector_provider(p.as_str());
    }
    if let Some(ref p) = cli.extractor_provider {
        builder = builder.extractor_provider(p.as_str());
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.as_str());
    }
    if let Some(ref dir) = cli.cache_dir {
        builder = builder.image_cache_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_flag_is_parsed_by_clap() {
        let cli = Cli::parse_from(["magnifier", "--pages", "2,5-7", "batch.pdf"]);
        assert_eq!(cli.pages, PageSelection::Set(vec![2, 5, 6, 7]));
        assert!(Cli::try_parse_from(["magnifier", "--pages", "0", "batch.pdf"]).is_err());
    }

    #[test]
    fn inspect_report_lists_known_fields() {
        let meta = DocumentMetadata {
            title: Some("Minutes".into()),
            producer: Some("Scanner 3000".into()),
            page_count: 12,
            pdf_version: "Pdf1_7".into(),
            ..Default::default()
        };
        let report = describe_document("batch.pdf", &meta, 4);
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(
            lines[0],
            "batch.pdf: 12 page(s), PDF Pdf1_7; a scan would cover 4 page(s)"
        );
        assert_eq!(lines[1], "  title    Minutes");
        assert_eq!(lines[2], "  producer Scanner 3000");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn cli_defaults_build_valid_config() {
        let cli = Cli::parse_from(["magnifier", "batch.pdf"]);
        let config = build_config(&cli, None).unwrap();
        assert_eq!(config.dpi, 200);
        assert_eq!(config.detector_model, DEFAULT_DETECTOR_MODEL);
        assert_eq!(config.extractor_model, DEFAULT_EXTRACTOR_MODEL);
    }
}
