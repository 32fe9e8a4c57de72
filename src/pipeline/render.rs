//! PDF rasterisation: one page at a time, to PNG, via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so
//! Tokio worker threads never stall on a CPU-heavy render.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Scans arrive at every physical size. Scale is `dpi / 72`, but the longest
//! edge is additionally capped at `max_rendered_pixels` so an oversized page
//! cannot blow up memory or the request size.
//!
//! ## Caching
//!
//! Rendering is deterministic for a given `(document, page, resolution)`,
//! so [`CachingRenderer`] keeps the most recently used pages in memory and,
//! optionally, every page on disk under
//! `<cache>/<document_id>-<fingerprint>/<dpi>-<variant>/page_<n>.png`.
//! The fingerprint separates documents that share a file stem; the variant
//! carries renderer settings such as the pixel cap. Retrying failed pages or
//! resuming a cancelled run never re-rasterises.

use crate::error::{MagnifierError, RenderError};
use crate::pipeline::input::{Document, DocumentSource};
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A rendered page. Immutable once produced; clones share the PNG bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub document_id: String,
    /// 0-based page index within the document.
    pub page_index: usize,
    /// Render resolution in DPI.
    pub resolution: u32,
    png: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
}

impl PageImage {
    /// Wrap already-encoded PNG bytes.
    pub fn from_png(
        document_id: impl Into<String>,
        page_index: usize,
        resolution: u32,
        png: impl Into<Arc<[u8]>>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            page_index,
            resolution,
            png: png.into(),
            width,
            height,
        }
    }

    /// PNG-encode a decoded image.
    pub fn from_image(
        document_id: impl Into<String>,
        page_index: usize,
        resolution: u32,
        image: &DynamicImage,
    ) -> Result<Self, RenderError> {
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| RenderError::Encoding {
                page: page_index + 1,
                detail: e.to_string(),
            })?;
        Ok(Self::from_png(
            document_id,
            page_index,
            resolution,
            buf,
            image.width(),
            image.height(),
        ))
    }

    pub fn png(&self) -> &[u8] {
        &self.png
    }
}

/// Cache key of a rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub document_id: String,
    pub fingerprint: String,
    pub page_index: usize,
    pub resolution: u32,
}

impl RenderKey {
    pub fn new(document: &Document, page_index: usize, resolution: u32) -> Self {
        Self {
            document_id: document.id.clone(),
            fingerprint: document.fingerprint().to_string(),
            page_index,
            resolution,
        }
    }
}

/// Document-level information read without rendering.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Turns documents into page images.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Number of pages; fails fatally for unreadable or locked documents.
    async fn page_count(&self, document: &Document) -> Result<usize, MagnifierError>;

    /// Render one page. Identical inputs must yield identical bytes.
    async fn render(
        &self,
        document: &Document,
        page_index: usize,
        resolution: u32,
    ) -> Result<PageImage, RenderError>;

    /// Settings besides the resolution that change the output bytes.
    fn variant(&self) -> Option<String> {
        None
    }
}

/// Lazy, finite stream of rendered pages in the order `indices` yields them.
///
/// Nothing is rendered until the stream is polled, and each index is drawn
/// from `indices` only when the previous page is done, so a lazy iterator
/// can stop the sequence early. Calling this again restarts from the first
/// index.
pub fn page_sequence<'a, R, I>(
    renderer: &'a R,
    document: &'a Document,
    indices: I,
    resolution: u32,
) -> impl Stream<Item = (usize, Result<PageImage, RenderError>)> + Send + 'a
where
    R: PageRenderer + ?Sized,
    I: IntoIterator<Item = usize>,
    I::IntoIter: Send + 'a,
{
    stream::iter(indices).then(move |idx| async move {
        (idx, renderer.render(document, idx, resolution).await)
    })
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// [`PageRenderer`] backed by pdfium.
///
/// The library is bound on first use and the binding is shared by all
/// clones of the renderer.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    max_rendered_pixels: u32,
    password: Option<String>,
    pdfium: Arc<OnceCell<Pdfium>>,
}

impl PdfiumRenderer {
    pub fn new(max_rendered_pixels: u32, password: Option<String>) -> Self {
        Self {
            max_rendered_pixels,
            password,
            pdfium: Arc::new(OnceCell::new()),
        }
    }

    /// Read metadata and page count without rendering.
    pub async fn metadata(&self, document: &Document) -> Result<DocumentMetadata, MagnifierError> {
        let document = document.clone();
        let password = self.password.clone();
        let pdfium = Arc::clone(&self.pdfium);
        tokio::task::spawn_blocking(move || {
            let pdfium = pdfium.get_or_try_init(bind_pdfium)?;
            metadata_blocking(pdfium, &document, password.as_deref())
        })
        .await
        .map_err(|e| MagnifierError::Internal(format!("Metadata task panicked: {}", e)))?
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn page_count(&self, document: &Document) -> Result<usize, MagnifierError> {
        Ok(self.metadata(document).await?.page_count)
    }

    async fn render(
        &self,
        document: &Document,
        page_index: usize,
        resolution: u32,
    ) -> Result<PageImage, RenderError> {
        let document = document.clone();
        let password = self.password.clone();
        let max_pixels = self.max_rendered_pixels;
        let pdfium = Arc::clone(&self.pdfium);

        tokio::task::spawn_blocking(move || {
            let pdfium = pdfium
                .get_or_try_init(bind_pdfium)
                .map_err(|e| RenderError::Rasterisation {
                    page: page_index + 1,
                    detail: e.to_string(),
                })?;
            render_blocking(
                pdfium,
                &document,
                page_index,
                resolution,
                max_pixels,
                password.as_deref(),
            )
        })
        .await
        .map_err(|e| RenderError::Rasterisation {
            page: page_index + 1,
            detail: format!("Render task panicked: {}", e),
        })?
    }

    fn variant(&self) -> Option<String> {
        Some(format!("max{}", self.max_rendered_pixels))
    }
}

/// Bind pdfium: `PDFIUM_LIB_PATH` (file or directory) first, then the system library.
pub fn bind_pdfium() -> Result<Pdfium, MagnifierError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.is_empty() => {
            let path = PathBuf::from(p);
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            Pdfium::bind_to_library(&lib).map_err(|e| {
                MagnifierError::PdfiumBindingFailed(format!("{}: {}", lib.display(), e))
            })?
        }
        _ => Pdfium::bind_to_system_library()
            .map_err(|e| MagnifierError::PdfiumBindingFailed(e.to_string()))?,
    };
    Ok(Pdfium::new(bindings))
}

fn open_error(id: &str, password: Option<&str>, err: PdfiumError) -> MagnifierError {
    let err_str = format!("{:?}", err);
    if err_str.contains("Password") || err_str.contains("password") {
        if password.is_some() {
            MagnifierError::WrongPassword { id: id.to_string() }
        } else {
            MagnifierError::PasswordRequired { id: id.to_string() }
        }
    } else {
        MagnifierError::CorruptPdf {
            id: id.to_string(),
            detail: err_str,
        }
    }
}

fn load<'a>(
    pdfium: &'a Pdfium,
    document: &'a Document,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, MagnifierError> {
    let loaded = match document.source {
        DocumentSource::Path(ref path) => pdfium.load_pdf_from_file(path, password),
        DocumentSource::Bytes(ref bytes) => pdfium.load_pdf_from_byte_slice(&bytes[..], password),
    };
    loaded.map_err(|e| open_error(&document.id, password, e))
}

fn metadata_blocking(
    pdfium: &Pdfium,
    document: &Document,
    password: Option<&str>,
) -> Result<DocumentMetadata, MagnifierError> {
    let pdf = load(pdfium, document, password)?;

    let metadata = pdf.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            (!v.is_empty()).then_some(v)
        })
    };

    let page_count = pdf.pages().len() as usize;
    info!("PDF '{}' loaded: {} pages", document.id, page_count);

    Ok(DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        page_count,
        pdf_version: format!("{:?}", pdf.version()),
    })
}

fn render_blocking(
    pdfium: &Pdfium,
    document: &Document,
    page_index: usize,
    resolution: u32,
    max_pixels: u32,
    password: Option<&str>,
) -> Result<PageImage, RenderError> {
    let page_no = page_index + 1;
    let rasterisation = |detail: String| RenderError::Rasterisation {
        page: page_no,
        detail,
    };

    let pdf = load(pdfium, document, password).map_err(|e| rasterisation(e.to_string()))?;

    let pages = pdf.pages();
    let total = pages.len() as usize;
    if page_index >= total {
        return Err(RenderError::PageOutOfRange {
            page: page_no,
            total,
        });
    }

    let page = pages
        .get(page_index as u16)
        .map_err(|e| rasterisation(format!("{:?}", e)))?;

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(resolution as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| rasterisation(format!("{:?}", e)))?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} of '{}' → {}x{} px",
        page_no,
        document.id,
        image.width(),
        image.height()
    );

    PageImage::from_image(document.id.as_str(), page_index, resolution, &image)
}

// ── caching ──────────────────────────────────────────────────────────────

/// Pages kept in memory by default.
pub const DEFAULT_MEMORY_PAGES: usize = 16;

/// Least-recently-used page store with a fixed page cap.
struct MemoryCache {
    capacity: usize,
    pages: HashMap<RenderKey, PageImage>,
    order: VecDeque<RenderKey>,
}

impl MemoryCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pages: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &RenderKey) -> Option<PageImage> {
        let page = self.pages.get(key).cloned()?;
        self.touch(key);
        Some(page)
    }

    fn insert(&mut self, key: RenderKey, page: PageImage) {
        if self.capacity == 0 {
            return;
        }
        if self.pages.insert(key.clone(), page).is_some() {
            self.touch(&key);
        } else {
            self.order.push_back(key);
        }
        while self.pages.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.pages.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn touch(&mut self, key: &RenderKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

/// Memoising wrapper around any [`PageRenderer`].
pub struct CachingRenderer<R> {
    inner: R,
    memory: Mutex<MemoryCache>,
    disk_dir: Option<PathBuf>,
}

impl<R: PageRenderer> CachingRenderer<R> {
    pub fn new(inner: R, disk_dir: Option<PathBuf>) -> Self {
        Self::with_memory_capacity(inner, disk_dir, DEFAULT_MEMORY_PAGES)
    }

    /// Hold at most `pages` rendered pages in memory; 0 disables the memory tier.
    pub fn with_memory_capacity(inner: R, disk_dir: Option<PathBuf>, pages: usize) -> Self {
        Self {
            inner,
            memory: Mutex::new(MemoryCache::new(pages)),
            disk_dir,
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Number of pages held in memory.
    pub fn cached_pages(&self) -> usize {
        self.memory.lock().map(|m| m.pages.len()).unwrap_or(0)
    }

    fn cache_path(&self, key: &RenderKey) -> Option<PathBuf> {
        let settings = match self.inner.variant() {
            Some(variant) => format!("{}-{}", key.resolution, variant),
            None => key.resolution.to_string(),
        };
        self.disk_dir.as_ref().map(|dir| {
            dir.join(format!("{}-{}", key.document_id, key.fingerprint))
                .join(settings)
                .join(format!("page_{}.png", key.page_index + 1))
        })
    }

    fn remember(&self, key: RenderKey, page: &PageImage) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.insert(key, page.clone());
        }
    }
}

fn read_cached(path: &Path, key: &RenderKey) -> Option<PageImage> {
    let bytes = std::fs::read(path).ok()?;
    let image = image::load_from_memory_with_format(&bytes, ImageFormat::Png).ok()?;
    Some(PageImage::from_png(
        key.document_id.as_str(),
        key.page_index,
        key.resolution,
        bytes,
        image.width(),
        image.height(),
    ))
}

fn write_cached(path: &Path, png: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(png)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl<R: PageRenderer> PageRenderer for CachingRenderer<R> {
    async fn page_count(&self, document: &Document) -> Result<usize, MagnifierError> {
        self.inner.page_count(document).await
    }

    async fn render(
        &self,
        document: &Document,
        page_index: usize,
        resolution: u32,
    ) -> Result<PageImage, RenderError> {
        let key = RenderKey::new(document, page_index, resolution);

        let hit = self.memory.lock().ok().and_then(|mut m| m.get(&key));
        if let Some(page) = hit {
            debug!("Page {} served from memory cache", page_index + 1);
            return Ok(page);
        }

        let disk_path = self.cache_path(&key);
        if let Some(path) = disk_path.clone() {
            let lookup = key.clone();
            let cached = tokio::task::spawn_blocking(move || read_cached(&path, &lookup))
                .await
                .ok()
                .flatten();
            if let Some(page) = cached {
                debug!("Page {} served from disk cache", page_index + 1);
                self.remember(key, &page);
                return Ok(page);
            }
        }

        let page = self.inner.render(document, page_index, resolution).await?;
        if let Some(path) = disk_path {
            let rendered = page.clone();
            let written = tokio::task::spawn_blocking(move || {
                write_cached(&path, rendered.png()).map_err(|e| (path, e))
            })
            .await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err((path, e))) => {
                    warn!("Could not cache page {} at {}: {}", page_index + 1, path.display(), e)
                }
                Err(e) => warn!("Cache write task for page {} failed: {}", page_index + 1, e),
            }
        }
        self.remember(key, &page);
        Ok(page)
    }

    fn variant(&self) -> Option<String> {
        self.inner.variant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingRenderer {
        pages: usize,
        renders: AtomicUsize,
    }

    #[async_trait]
    impl PageRenderer for CountingRenderer {
        async fn page_count(&self, _document: &Document) -> Result<usize, MagnifierError> {
            Ok(self.pages)
        }

        async fn render(
            &self,
            document: &Document,
            page_index: usize,
            resolution: u32,
        ) -> Result<PageImage, RenderError> {
            if page_index >= self.pages {
                return Err(RenderError::PageOutOfRange {
                    page: page_index + 1,
                    total: self.pages,
                });
            }
            self.renders.fetch_add(1, Ordering::SeqCst);
            let shade = (page_index * 40) as u8;
            let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                8,
                8,
                Rgba([shade, shade, shade, 255]),
            ));
            PageImage::from_image(document.id.as_str(), page_index, resolution, &img)
        }
    }

    fn counting(pages: usize) -> CountingRenderer {
        CountingRenderer {
            pages,
            renders: AtomicUsize::new(0),
        }
    }

    fn doc() -> Document {
        Document::from_bytes("scan", b"%PDF-1.4".to_vec())
    }

    #[test]
    fn from_image_encodes_png() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 3, Rgba([0, 0, 0, 255])));
        let page = PageImage::from_image("d", 2, 200, &img).unwrap();
        assert_eq!(&page.png()[1..4], b"PNG");
        assert_eq!((page.width, page.height), (4, 3));
        assert_eq!(page.page_index, 2);
    }

    #[tokio::test]
    async fn memory_cache_renders_once() {
        let renderer = CachingRenderer::new(counting(2), None);
        let d = doc();
        let a = renderer.render(&d, 1, 150).await.unwrap();
        let b = renderer.render(&d, 1, 150).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(renderer.inner().renders.load(Ordering::SeqCst), 1);

        // Different resolution is a different key.
        renderer.render(&d, 1, 300).await.unwrap();
        assert_eq!(renderer.inner().renders.load(Ordering::SeqCst), 2);
        assert_eq!(renderer.cached_pages(), 2);
    }

    #[tokio::test]
    async fn disk_cache_survives_new_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let d = doc();

        let first = CachingRenderer::new(counting(1), Some(dir.path().to_path_buf()));
        let original = first.render(&d, 0, 200).await.unwrap();
        let folder = format!("scan-{}", d.fingerprint());
        assert!(dir.path().join(folder).join("200/page_1.png").exists());

        let second = CachingRenderer::new(counting(1), Some(dir.path().to_path_buf()));
        let cached = second.render(&d, 0, 200).await.unwrap();
        assert_eq!(cached.png(), original.png());
        assert_eq!(second.inner().renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn render_errors_are_not_cached() {
        let renderer = CachingRenderer::new(counting(1), None);
        let err = renderer.render(&doc(), 5, 200).await.unwrap_err();
        assert!(matches!(err, RenderError::PageOutOfRange { page: 6, total: 1 }));
        assert_eq!(renderer.cached_pages(), 0);
    }

    #[tokio::test]
    async fn memory_cache_stays_capped() {
        let renderer = CachingRenderer::with_memory_capacity(counting(10), None, 3);
        let d = doc();
        for idx in 0..10 {
            renderer.render(&d, idx, 200).await.unwrap();
            assert!(renderer.cached_pages() <= 3);
        }
        assert_eq!(renderer.cached_pages(), 3);

        // The most recent pages are still hits, the oldest were evicted.
        renderer.render(&d, 9, 200).await.unwrap();
        assert_eq!(renderer.inner().renders.load(Ordering::SeqCst), 10);
        renderer.render(&d, 0, 200).await.unwrap();
        assert_eq!(renderer.inner().renders.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn recently_used_pages_survive_eviction() {
        let renderer = CachingRenderer::with_memory_capacity(counting(4), None, 2);
        let d = doc();
        renderer.render(&d, 0, 200).await.unwrap();
        renderer.render(&d, 1, 200).await.unwrap();
        renderer.render(&d, 0, 200).await.unwrap();
        renderer.render(&d, 2, 200).await.unwrap();

        // Page 2 pushed out page 1, not the recently read page 0.
        renderer.render(&d, 0, 200).await.unwrap();
        assert_eq!(renderer.inner().renders.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_capacity_disables_memory_tier() {
        let renderer = CachingRenderer::with_memory_capacity(counting(1), None, 0);
        let d = doc();
        renderer.render(&d, 0, 200).await.unwrap();
        renderer.render(&d, 0, 200).await.unwrap();
        assert_eq!(renderer.cached_pages(), 0);
        assert_eq!(renderer.inner().renders.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn same_stem_documents_do_not_share_pages() {
        let dir = tempfile::tempdir().unwrap();
        let first = Document::from_bytes("scan", b"%PDF-1.4 first batch".to_vec());
        let second = Document::from_bytes("scan", b"%PDF-1.4 second batch".to_vec());

        let renderer = CachingRenderer::new(counting(1), Some(dir.path().to_path_buf()));
        renderer.render(&first, 0, 200).await.unwrap();

        let fresh = CachingRenderer::new(counting(1), Some(dir.path().to_path_buf()));
        fresh.render(&second, 0, 200).await.unwrap();
        assert_eq!(fresh.inner().renders.load(Ordering::SeqCst), 1);

        // The first document is still served from disk.
        fresh.render(&first, 0, 200).await.unwrap();
        assert_eq!(fresh.inner().renders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disk_path_carries_renderer_settings() {
        let dir = PathBuf::from("/cache");
        let d = doc();
        let renderer = CachingRenderer::new(PdfiumRenderer::new(2000, None), Some(dir));
        let path = renderer.cache_path(&RenderKey::new(&d, 4, 300)).unwrap();
        let expected = PathBuf::from("/cache")
            .join(format!("scan-{}", d.fingerprint()))
            .join("300-max2000")
            .join("page_5.png");
        assert_eq!(path, expected);
        assert_ne!(
            path,
            CachingRenderer::new(PdfiumRenderer::new(1000, None), Some(PathBuf::from("/cache")))
                .cache_path(&RenderKey::new(&d, 4, 300))
                .unwrap()
        );
    }

    #[test]
    fn pdfium_is_bound_lazily_and_shared() {
        let renderer = PdfiumRenderer::new(2000, None);
        let clone = renderer.clone();
        assert!(renderer.pdfium.get().is_none());
        assert!(Arc::ptr_eq(&renderer.pdfium, &clone.pdfium));
    }

    #[test]
    fn page_sequence_draws_indices_lazily() {
        let renderer = counting(5);
        let d = doc();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let indices = (0..5).take_while(move |_| !flag.load(Ordering::SeqCst));

        let mut seq = Box::pin(page_sequence(&renderer, &d, indices, 100));
        let rendered = tokio_test::block_on(async {
            let mut seen = Vec::new();
            while let Some((idx, _)) = seq.next().await {
                seen.push(idx);
                if idx == 1 {
                    stop.store(true, Ordering::SeqCst);
                }
            }
            seen
        });
        assert_eq!(rendered, vec![0, 1]);
        assert_eq!(renderer.renders.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn page_sequence_is_lazy_and_restartable() {
        let renderer = counting(3);
        let d = doc();
        let indices = vec![0, 2];

        let seq = page_sequence(&renderer, &d, indices.clone(), 100);
        assert_eq!(renderer.renders.load(Ordering::SeqCst), 0);
        let first: Vec<usize> = tokio_test::block_on(
            seq.map(|(i, r)| {
                assert!(r.is_ok());
                i
            })
            .collect(),
        );
        assert_eq!(first, vec![0, 2]);

        let again: Vec<usize> = tokio_test::block_on(
            page_sequence(&renderer, &d, indices.clone(), 100)
                .map(|(i, _)| i)
                .collect(),
        );
        assert_eq!(again, vec![0, 2]);
        assert_eq!(renderer.renders.load(Ordering::SeqCst), 4);
    }
}
