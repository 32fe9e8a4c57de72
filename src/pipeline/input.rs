//! Input resolution: turn a path, URL or byte buffer into a [`Document`].
//!
//! Every document is checked for the `%PDF` magic bytes and the configured
//! size limit before a single page is rendered. Downloads are held in
//! memory; pdfium reads them straight from the byte slice.

use crate::error::MagnifierError;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Where the PDF bytes come from.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    /// A local file, read by pdfium directly.
    Path(PathBuf),
    /// Bytes already in memory (upload, download, database blob).
    Bytes(Arc<[u8]>),
}

/// A PDF to scan, plus the id its pages and cache entries are keyed by.
///
/// The id is for people (file stem, URL segment) and need not be unique.
/// The fingerprint tells two documents with the same id apart.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source: DocumentSource,
    fingerprint: String,
}

impl Document {
    /// A local file; the id is the file stem.
    ///
    /// The fingerprint covers the absolute path, size and modification time,
    /// so the file is not read twice.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        let mut hasher = Sha256::new();
        let absolute = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        hasher.update(absolute.to_string_lossy().as_bytes());
        if let Ok(meta) = std::fs::metadata(&path) {
            hasher.update(meta.len().to_le_bytes());
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            hasher.update(modified.to_le_bytes());
        }

        Self {
            id,
            source: DocumentSource::Path(path),
            fingerprint: short_hex(hasher),
        }
    }

    /// In-memory bytes under a caller-chosen id; the fingerprint hashes the bytes.
    pub fn from_bytes(id: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        let mut hasher = Sha256::new();
        hasher.update(&bytes[..]);
        Self {
            id: id.into(),
            source: DocumentSource::Bytes(bytes),
            fingerprint: short_hex(hasher),
        }
    }

    /// Short content fingerprint (16 hex digits).
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn short_hex(hasher: Sha256) -> String {
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(16);
    digest
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a validated [`Document`].
///
/// URLs are downloaded into memory; local paths are checked for existence,
/// read permission, size and PDF magic bytes.
pub async fn resolve_input(
    input: &str,
    max_bytes: u64,
    timeout_secs: u64,
) -> Result<Document, MagnifierError> {
    if is_url(input) {
        download_url(input, max_bytes, timeout_secs).await
    } else {
        resolve_local(input, max_bytes)
    }
}

/// Validate bytes that are already in memory.
pub fn validate_bytes(document: &Document, max_bytes: u64) -> Result<(), MagnifierError> {
    if let DocumentSource::Bytes(ref bytes) = document.source {
        check_size(&document.id, bytes.len() as u64, max_bytes)?;
        check_magic(&document.id, bytes)?;
    }
    Ok(())
}

fn check_size(id: &str, size: u64, limit: u64) -> Result<(), MagnifierError> {
    if size > limit {
        return Err(MagnifierError::DocumentTooLarge {
            id: id.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

fn check_magic(id: &str, head: &[u8]) -> Result<(), MagnifierError> {
    if head.len() < 4 || &head[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = head.len().min(4);
        magic[..n].copy_from_slice(&head[..n]);
        return Err(MagnifierError::NotAPdf {
            id: id.to_string(),
            magic,
        });
    }
    Ok(())
}

/// Resolve a local file path, validating existence, size and PDF magic bytes.
fn resolve_local(path_str: &str, max_bytes: u64) -> Result<Document, MagnifierError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(MagnifierError::FileNotFound { path });
    }

    let document = Document::from_path(&path);
    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let size = f.metadata().map(|m| m.len()).unwrap_or(0);
            check_size(&document.id, size, max_bytes)?;
            let mut magic = [0u8; 4];
            let n = f.read(&mut magic).unwrap_or(0);
            check_magic(&document.id, &magic[..n])?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(MagnifierError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(MagnifierError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(document)
}

/// Download a URL into memory.
async fn download_url(
    url: &str,
    max_bytes: u64,
    timeout_secs: u64,
) -> Result<Document, MagnifierError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| MagnifierError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            MagnifierError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            MagnifierError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(MagnifierError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let id = document_id_from_url(url);
    if let Some(len) = response.content_length() {
        check_size(&id, len, max_bytes)?;
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| MagnifierError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let document = Document::from_bytes(id, bytes.to_vec());
    validate_bytes(&document, max_bytes)?;

    info!("Downloaded {} bytes as '{}'", bytes.len(), document.id);
    Ok(document)
}

/// Last path segment of the URL without its extension.
fn document_id_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                let stem = Path::new(last)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !stem.is_empty() {
                    return stem;
                }
            }
        }
    }

    "downloaded".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn id_from_url() {
        assert_eq!(document_id_from_url("https://example.com/a/report-7.pdf"), "report-7");
        assert_eq!(document_id_from_url("https://example.com/"), "downloaded");
    }

    #[test]
    fn id_from_path_is_stem() {
        assert_eq!(Document::from_path("/data/batch_12.pdf").id, "batch_12");
    }

    #[test]
    fn same_stem_different_content() {
        let a = Document::from_bytes("scan", b"%PDF-1.4 first".to_vec());
        let b = Document::from_bytes("scan", b"%PDF-1.4 second".to_vec());
        let again = Document::from_bytes("scan", b"%PDF-1.4 first".to_vec());
        assert_eq!(a.id, b.id);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), again.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }

    #[test]
    fn same_stem_in_different_folders() {
        let root = tempfile::tempdir().unwrap();
        for dir in ["a", "b"] {
            std::fs::create_dir(root.path().join(dir)).unwrap();
            std::fs::write(root.path().join(dir).join("scan.pdf"), b"%PDF-1.4\n").unwrap();
        }
        let a = Document::from_path(root.path().join("a/scan.pdf"));
        let b = Document::from_path(root.path().join("b/scan.pdf"));
        assert_eq!(a.id, b.id);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn rejects_non_pdf_bytes() {
        let doc = Document::from_bytes("x", b"PK\x03\x04zip".to_vec());
        assert!(matches!(
            validate_bytes(&doc, 1024),
            Err(MagnifierError::NotAPdf { .. })
        ));
    }

    #[test]
    fn rejects_oversized_bytes() {
        let doc = Document::from_bytes("x", b"%PDF-1.7 ...".to_vec());
        assert!(matches!(
            validate_bytes(&doc, 4),
            Err(MagnifierError::DocumentTooLarge { .. })
        ));
        assert!(validate_bytes(&doc, 1024).is_ok());
    }

    #[tokio::test]
    async fn local_file_checks() {
        let missing = resolve_input("/definitely/not/here.pdf", 1024, 5).await;
        assert!(matches!(missing, Err(MagnifierError::FileNotFound { .. })));

        let mut tmp = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        tmp.write_all(b"%PDF-1.4\n").unwrap();
        let doc = resolve_input(tmp.path().to_str().unwrap(), 1024, 5)
            .await
            .unwrap();
        assert!(matches!(doc.source, DocumentSource::Path(_)));
    }
}
