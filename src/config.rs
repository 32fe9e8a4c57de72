//! Run configuration.
//!
//! Every knob of a scan lives in [`RunConfig`], built via
//! [`RunConfigBuilder`]. The builder clamps obviously out-of-range values;
//! [`RunConfig::validate`] is the authoritative check and runs again at the
//! start of every run, so a config whose public fields were edited by hand
//! still fails with [`MagnifierError::InvalidConfig`] before any page is
//! processed.

use crate::error::MagnifierError;
use crate::pipeline::backend::VisionBackend;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default detector model (fast, cheap yes/no classification).
pub const DEFAULT_DETECTOR_MODEL: &str = "gemini-2.0-flash";

/// Default extractor model (structured output).
pub const DEFAULT_EXTRACTOR_MODEL: &str = "gpt-4o-2024-08-06";

/// Default upload limit: 50 MiB.
pub const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 50 * 1024 * 1024;

/// Configuration for one scan run.
///
/// # Example
/// ```rust
/// use edgequake_magnifier::RunConfig;
///
/// let config = RunConfig::builder()
///     .dpi(200)
///     .concurrency(4)
///     .max_retries(3)
///     .detector_model("gemini-2.0-flash")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct RunConfig {
    /// Rendering resolution in DPI. Range: 72–400. Default: 200.
    ///
    /// The marginal glyph is small; 200 DPI keeps it recognisable while an
    /// A4 page stays around 1650 × 2340 px.
    pub dpi: u32,

    /// Cap on the longest edge of a rendered page, in pixels. Default: 2400.
    pub max_rendered_pixels: u32,

    /// Number of pages in flight at once. Default: 4.
    pub concurrency: usize,

    /// Retries after the first attempt on a transient model error. Default: 3.
    ///
    /// A page therefore sees at most `max_retries + 1` calls per stage.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds; doubles after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-attempt model call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Provider for detection ("gemini", "openai", …). None → auto-detect.
    pub detector_provider: Option<String>,

    /// Model identifier used for detection.
    pub detector_model: String,

    /// Provider for extraction. None → auto-detect.
    pub extractor_provider: Option<String>,

    /// Model identifier used for extraction.
    pub extractor_model: String,

    /// Pre-constructed detection backend. Takes precedence over the provider name.
    pub detector_backend: Option<Arc<dyn VisionBackend>>,

    /// Pre-constructed extraction backend. Takes precedence over the provider name.
    pub extractor_backend: Option<Arc<dyn VisionBackend>>,

    /// Sampling temperature. Default: 0.0 (both stages are classification-like).
    pub temperature: f32,

    /// Maximum tokens the extractor may generate per page. Default: 1000.
    pub max_tokens: usize,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Directory where rendered pages are cached between runs.
    pub image_cache_dir: Option<PathBuf>,

    /// Reject documents larger than this many bytes. Default: 50 MiB.
    pub max_document_bytes: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Receives run and page events.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 2400,
            concurrency: 4,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            detector_provider: None,
            detector_model: DEFAULT_DETECTOR_MODEL.to_string(),
            extractor_provider: None,
            extractor_model: DEFAULT_EXTRACTOR_MODEL.to_string(),
            detector_backend: None,
            extractor_backend: None,
            temperature: 0.0,
            max_tokens: 1000,
            pages: PageSelection::default(),
            password: None,
            image_cache_dir: None,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("detector_provider", &self.detector_provider)
            .field("detector_model", &self.detector_model)
            .field("extractor_provider", &self.extractor_provider)
            .field("extractor_model", &self.extractor_model)
            .field(
                "detector_backend",
                &self.detector_backend.as_ref().map(|_| "<dyn VisionBackend>"),
            )
            .field(
                "extractor_backend",
                &self.extractor_backend.as_ref().map(|_| "<dyn VisionBackend>"),
            )
            .field("pages", &self.pages)
            .field("image_cache_dir", &self.image_cache_dir)
            .finish()
    }
}

impl RunConfig {
    /// Create a new builder for `RunConfig`.
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check every constraint. Called by the builder and again at run start.
    pub fn validate(&self) -> Result<(), MagnifierError> {
        if !(72..=400).contains(&self.dpi) {
            return Err(MagnifierError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                self.dpi
            )));
        }
        if self.max_rendered_pixels < 100 {
            return Err(MagnifierError::InvalidConfig(format!(
                "max_rendered_pixels must be ≥ 100, got {}",
                self.max_rendered_pixels
            )));
        }
        if self.concurrency == 0 {
            return Err(MagnifierError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if self.max_retries > 10 {
            return Err(MagnifierError::InvalidConfig(format!(
                "max_retries must be ≤ 10, got {}",
                self.max_retries
            )));
        }
        if self.api_timeout_secs == 0 {
            return Err(MagnifierError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if self.detector_model.trim().is_empty() {
            return Err(MagnifierError::InvalidConfig(
                "detector model id is empty".into(),
            ));
        }
        if self.extractor_model.trim().is_empty() {
            return Err(MagnifierError::InvalidConfig(
                "extractor model id is empty".into(),
            ));
        }
        if let PageSelection::Range(start, end) = self.pages {
            if start == 0 || start > end {
                return Err(MagnifierError::InvalidConfig(format!(
                    "Invalid page range {start}-{end}: pages are 1-indexed and start must be <= end"
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`RunConfig`].
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl fmt::Debug for RunConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.config.fmt(f)
    }
}

impl RunConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn detector_provider(mut self, name: impl Into<String>) -> Self {
        self.config.detector_provider = Some(name.into());
        self
    }

    pub fn detector_model(mut self, model: impl Into<String>) -> Self {
        self.config.detector_model = model.into();
        self
    }

    pub fn extractor_provider(mut self, name: impl Into<String>) -> Self {
        self.config.extractor_provider = Some(name.into());
        self
    }

    pub fn extractor_model(mut self, model: impl Into<String>) -> Self {
        self.config.extractor_model = model.into();
        self
    }

    pub fn detector_backend(mut self, backend: Arc<dyn VisionBackend>) -> Self {
        self.config.detector_backend = Some(backend);
        self
    }

    pub fn extractor_backend(mut self, backend: Arc<dyn VisionBackend>) -> Self {
        self.config.extractor_backend = Some(backend);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn image_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.image_cache_dir = Some(dir.into());
        self
    }

    pub fn max_document_bytes(mut self, n: u64) -> Self {
        self.config.max_document_bytes = n;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn ProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RunConfig, MagnifierError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Specifies which pages of the PDF to scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Scan all pages (default).
    #[default]
    All,
    /// Scan a single page (1-indexed).
    Single(usize),
    /// Scan a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Scan specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// Parses `all`, `7`, `3-15`, `1,3,5` and mixed lists such as `1,4-6,9`.
impl std::str::FromStr for PageSelection {
    type Err = MagnifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim();
        if spec.eq_ignore_ascii_case("all") {
            return Ok(PageSelection::All);
        }

        let bad = |why: String| MagnifierError::InvalidConfig(format!("pages '{spec}': {why}"));
        let page = |item: &str| -> Result<usize, MagnifierError> {
            match item.trim().parse::<usize>() {
                Ok(0) => Err(bad("pages start at 1".into())),
                Ok(n) => Ok(n),
                Err(_) => Err(bad(format!("'{}' is not a page number", item.trim()))),
            }
        };
        let span = |item: &str| -> Result<(usize, usize), MagnifierError> {
            match item.split_once('-') {
                Some((a, b)) => {
                    let (a, b) = (page(a)?, page(b)?);
                    if a > b {
                        return Err(bad(format!("range {a}-{b} runs backwards")));
                    }
                    Ok((a, b))
                }
                None => page(item).map(|n| (n, n)),
            }
        };

        let spans = spec.split(',').map(span).collect::<Result<Vec<_>, _>>()?;
        Ok(match spans.as_slice() {
            [(a, b)] if a == b && !spec.contains('-') => PageSelection::Single(*a),
            [(a, b)] if !spec.contains(',') => PageSelection::Range(*a, *b),
            _ => PageSelection::Set(spans.iter().flat_map(|&(a, b)| a..=b).collect()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dpi, 200);
        assert_eq!(config.detector_model, DEFAULT_DETECTOR_MODEL);
    }

    #[test]
    fn page_selection_from_str() {
        let parse = |s: &str| s.parse::<PageSelection>();
        assert_eq!(parse("ALL").unwrap(), PageSelection::All);
        assert_eq!(parse(" 7 ").unwrap(), PageSelection::Single(7));
        assert_eq!(parse("3-15").unwrap(), PageSelection::Range(3, 15));
        assert_eq!(parse("4-4").unwrap(), PageSelection::Range(4, 4));
        assert_eq!(parse("1,3,5").unwrap(), PageSelection::Set(vec![1, 3, 5]));
        assert_eq!(
            parse("1, 4-6 ,9").unwrap(),
            PageSelection::Set(vec![1, 4, 5, 6, 9])
        );
    }

    #[test]
    fn page_selection_rejects_bad_input() {
        for bad in ["0", "9-2", "1,x", "one", "2,", "-3", "1-0"] {
            let err = bad.parse::<PageSelection>().unwrap_err();
            assert!(matches!(err, MagnifierError::InvalidConfig(_)), "{bad}");
        }
    }

    #[test]
    fn builder_clamps_dpi() {
        let config = RunConfig::builder().dpi(1000).build().unwrap();
        assert_eq!(config.dpi, 400);
    }

    #[test]
    fn hand_edited_config_fails_validation() {
        let mut config = RunConfig::default();
        config.concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(MagnifierError::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_model_rejected() {
        let result = RunConfig::builder().extractor_model("  ").build();
        assert!(matches!(result, Err(MagnifierError::InvalidConfig(_))));
    }

    #[test]
    fn inverted_range_rejected() {
        let result = RunConfig::builder()
            .pages(PageSelection::Range(5, 2))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn selection_range_clipping() {
        assert_eq!(PageSelection::Range(3, 10).to_indices(4), vec![2, 3]);
        assert_eq!(PageSelection::Single(100).to_indices(4), Vec::<usize>::new());
        assert_eq!(
            PageSelection::Set(vec![3, 1, 3, 2]).to_indices(5),
            vec![0, 1, 2]
        );
    }
}
