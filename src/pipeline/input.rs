//! Input resolution: turn a path, URL or byte buffer into a [`DocumentInput`],
//! and give each job a private scratch directory.
//!
//! ── Content type ──
//!
//! Callers may declare a MIME type. When they don't, the bytes are sniffed:
//! `%PDF` means a PDF, anything the `image` crate recognises is an image,
//! everything else is rejected before any work is scheduled.
//!
//! ── Workspace ──
//!
//! pdfium opens documents by path, so every job writes its document into a
//! fresh [`JobWorkspace`]. The directory is a `TempDir` and disappears when
//! the workspace is dropped, whichever way the job ends.

use crate::error::LayoutError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

/// Prefix of every job workspace directory.
pub const WORKSPACE_PREFIX: &str = "doclayout-";

/// The two document shapes the pipeline knows how to split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Multi-page PDF, rasterised page by page.
    Pdf,
    /// A single raster image, analysed as page 1.
    Image,
}

impl ContentKind {
    /// Classify a declared MIME type. Parameters (`; charset=...`) are ignored.
    pub fn from_mime(content_type: &str) -> Result<Self, LayoutError> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence == "application/pdf" {
            Ok(ContentKind::Pdf)
        } else if essence.starts_with("image/") && essence.len() > "image/".len() {
            Ok(ContentKind::Image)
        } else {
            Err(LayoutError::UnsupportedContentType {
                content_type: content_type.to_string(),
            })
        }
    }

    /// Guess the MIME type of `bytes` from their magic number.
    pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
        if bytes.starts_with(b"%PDF") {
            return Some("application/pdf");
        }
        image::guess_format(bytes).ok().map(|f| f.to_mime_type())
    }
}

/// A document held in memory with its content type.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl DocumentInput {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    /// Build an input whose content type is sniffed from the bytes.
    pub fn sniffed(bytes: impl Into<Vec<u8>>) -> Result<Self, LayoutError> {
        let bytes = bytes.into();
        let content_type = ContentKind::sniff(&bytes).ok_or_else(|| LayoutError::UnsupportedContentType {
            content_type: "unknown (unrecognised magic bytes)".to_string(),
        })?;
        Ok(Self::new(bytes, content_type))
    }

    /// Use `declared` when given, otherwise sniff.
    pub fn with_declared(bytes: Vec<u8>, declared: Option<&str>) -> Result<Self, LayoutError> {
        match declared {
            Some(ct) if !ct.trim().is_empty() => Ok(Self::new(bytes, ct.trim())),
            _ => Self::sniffed(bytes),
        }
    }

    pub fn kind(&self) -> Result<ContentKind, LayoutError> {
        ContentKind::from_mime(&self.content_type)
    }

    /// File name used inside the job workspace.
    fn file_name(&self) -> String {
        let ext = match self.kind() {
            Ok(ContentKind::Pdf) => "pdf",
            _ => self
                .content_type
                .split(';')
                .next()
                .and_then(|m| m.trim().strip_prefix("image/"))
                .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()))
                .unwrap_or("bin"),
        };
        format!("document.{ext}")
    }
}

/// A per-job temporary directory, removed on drop.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: TempDir,
}

impl JobWorkspace {
    pub fn new() -> Result<Self, LayoutError> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir()
            .map_err(LayoutError::Workspace)?;
        debug!("Created job workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `input` into the workspace and return the file's path.
    pub async fn write_document(&self, input: &DocumentInput) -> Result<PathBuf, LayoutError> {
        let path = self.dir.path().join(input.file_name());
        tokio::fs::write(&path, &input.bytes)
            .await
            .map_err(LayoutError::Workspace)?;
        debug!("Wrote {} bytes to {}", input.bytes.len(), path.display());
        Ok(path)
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or URL into an in-memory document.
///
/// `content_type` overrides whatever the server or the magic bytes say.
pub async fn resolve_input(
    input: &str,
    content_type: Option<&str>,
    download_timeout_secs: u64,
) -> Result<DocumentInput, LayoutError> {
    if input.trim().is_empty() {
        return Err(LayoutError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, content_type, download_timeout_secs).await
    } else {
        read_local(Path::new(input), content_type).await
    }
}

/// Read a local file.
pub async fn read_local(path: &Path, content_type: Option<&str>) -> Result<DocumentInput, LayoutError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => LayoutError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => LayoutError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    DocumentInput::with_declared(bytes, content_type)
}

async fn download_url(
    url: &str,
    content_type: Option<&str>,
    timeout_secs: u64,
) -> Result<DocumentInput, LayoutError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LayoutError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            LayoutError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            LayoutError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;
    if !response.status().is_success() {
        return Err(LayoutError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let served = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|ct| ContentKind::from_mime(ct).is_ok())
        .map(str::to_string);

    let bytes = response.bytes().await.map_err(map_err)?.to_vec();
    info!("Downloaded {} bytes", bytes.len());

    DocumentInput::with_declared(bytes, content_type.or(served.as_deref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn mime_classification() {
        assert_eq!(ContentKind::from_mime("application/pdf").unwrap(), ContentKind::Pdf);
        assert_eq!(
            ContentKind::from_mime("Application/PDF; charset=binary").unwrap(),
            ContentKind::Pdf
        );
        assert_eq!(ContentKind::from_mime("image/png").unwrap(), ContentKind::Image);
        assert!(matches!(
            ContentKind::from_mime("text/plain"),
            Err(LayoutError::UnsupportedContentType { .. })
        ));
        assert!(ContentKind::from_mime("image/").is_err());
    }

    #[test]
    fn sniffing_pdf_and_png() {
        assert_eq!(ContentKind::sniff(b"%PDF-1.7\n..."), Some("application/pdf"));
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        assert_eq!(ContentKind::sniff(png), Some("image/png"));
        assert_eq!(ContentKind::sniff(b"hello world"), None);
    }

    #[test]
    fn unrecognised_bytes_are_rejected() {
        assert!(matches!(
            DocumentInput::sniffed(b"plain text".to_vec()),
            Err(LayoutError::UnsupportedContentType { .. })
        ));
    }

    #[test]
    fn declared_type_wins_over_sniffing() {
        let input = DocumentInput::with_declared(b"%PDF-1.4".to_vec(), Some("image/png")).unwrap();
        assert_eq!(input.content_type, "image/png");
        let input = DocumentInput::with_declared(b"%PDF-1.4".to_vec(), Some("  ")).unwrap();
        assert_eq!(input.content_type, "application/pdf");
    }

    #[test]
    fn workspace_file_names() {
        assert_eq!(DocumentInput::new(vec![], "application/pdf").file_name(), "document.pdf");
        assert_eq!(DocumentInput::new(vec![], "image/jpeg").file_name(), "document.jpeg");
        assert_eq!(DocumentInput::new(vec![], "image/../x").file_name(), "document.bin");
    }

    #[tokio::test]
    async fn workspace_is_removed_on_drop() {
        let ws = JobWorkspace::new().unwrap();
        let dir = ws.path().to_path_buf();
        assert!(dir
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(WORKSPACE_PREFIX)));
        let path = ws
            .write_document(&DocumentInput::new(b"%PDF-1.4".to_vec(), "application/pdf"))
            .await
            .unwrap();
        assert!(path.exists());
        drop(ws);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn missing_local_file_is_not_found() {
        let err = resolve_input("/definitely/not/here.pdf", None, 5).await.unwrap_err();
        assert!(matches!(err, LayoutError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn blank_input_is_invalid() {
        let err = resolve_input("   ", None, 5).await.unwrap_err();
        assert!(matches!(err, LayoutError::InvalidInput { .. }));
    }
}
