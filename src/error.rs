//! Error types for the edgequake-doclayout library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`LayoutError`]: **Fatal**: the job cannot produce a document at all
//!   (unreadable input, corrupt PDF, no pages, provider not configured).
//!   Returned as `Err(LayoutError)` from the top-level `analyze*` functions.
//!
//! * [`PageError`]: **Degraded**: one page could not be analysed (remote
//!   call failed, timed out, returned garbage). The page is dropped from the
//!   aggregate and the job still completes; the error is logged, reported to
//!   the progress callback and counted in [`crate::model::AnalysisStats`].
//!
//! Normalisation (denoise/deskew) has no error type: it is fail-open and
//! reports skips as [`crate::pipeline::normalize::NormalizeOutcome::Unchanged`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-doclayout library.
#[derive(Debug, Error)]
pub enum LayoutError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The declared (or sniffed) content type is neither a PDF nor an image.
    #[error("Unsupported content type '{content_type}': expected application/pdf or image/*")]
    UnsupportedContentType { content_type: String },

    // ── Split errors ──────────────────────────────────────────────────────
    /// Image bytes could not be decoded.
    #[error("Image could not be decoded: {detail}")]
    CorruptImage { detail: String },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    CorruptPdf { detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired,

    /// A password was provided but it is wrong.
    #[error("Wrong password for encrypted PDF")]
    WrongPassword,

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The document was readable but produced zero pages.
    #[error("Document contains no pages")]
    NoPages,

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library next to the binary,\n\
or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the job's temporary workspace or write into it.
    #[error("Job workspace error: {0}")]
    Workspace(#[source] std::io::Error),

    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// The page is dropped from the aggregate; the job carries on.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The remote analysis capability returned an error after retries.
    #[error("Page {page}: remote analysis failed after {attempts} attempt(s): {detail}")]
    RemoteFailed {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// The remote call exceeded the per-page bound.
    #[error("Page {page}: remote analysis timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The remote capability answered with nothing.
    #[error("Page {page}: remote analysis returned an empty response")]
    EmptyResponse { page: usize },

    /// Neither the bracket span nor the fence-stripped text parsed as a JSON array.
    #[error("Page {page}: unparseable region list: {detail}")]
    UnparseableResponse { page: usize, detail: String },

    /// The normalised page could not be encoded for upload.
    #[error("Page {page}: image encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// The page's unit of work panicked or was cancelled.
    #[error("Page {page}: task aborted: {detail}")]
    TaskAborted { page: usize, detail: String },
}

impl PageError {
    /// The 1-based page number the error refers to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RemoteFailed { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::EmptyResponse { page }
            | PageError::UnparseableResponse { page, .. }
            | PageError::EncodeFailed { page, .. }
            | PageError::TaskAborted { page, .. } => *page,
        }
    }
}
